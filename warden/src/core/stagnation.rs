//! Stagnation Detector over a bounded window of iteration fingerprints.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

/// What an iteration changed, reduced to something comparable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fingerprint {
    /// Hash of a non-empty committed diff.
    Diff(String),
    /// Committed, but the tree did not change.
    NoOp,
    RolledBack,
    Fallback,
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fingerprint::Diff(hash) => {
                let short: String = hash.chars().take(12).collect();
                write!(f, "diff:{short}")
            }
            Fingerprint::NoOp => f.write_str("no_op"),
            Fingerprint::RolledBack => f.write_str("rolled_back"),
            Fingerprint::Fallback => f.write_str("fallback"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationKind {
    WidenScope,
    ForceTierUpgrade,
    RequestHuman,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    pub kind: EscalationKind,
    /// Position within the current streak of escalations (1-based).
    pub level: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagnationPolicy {
    /// K: fingerprints compared per window.
    pub window: usize,
    /// K2: escalations in a row before a human is asked.
    pub escalation_window: u32,
}

/// Persisted detector state (lives in the run state file).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagnationState {
    #[serde(default)]
    pub window: VecDeque<Fingerprint>,
    /// Escalations fired since the last real progress.
    #[serde(default)]
    pub streak: u32,
}

impl StagnationState {
    /// Record one iteration. Returns at most one escalation per full window;
    /// the window is cleared when it fires.
    pub fn observe(&mut self, fingerprint: Fingerprint, policy: &StagnationPolicy) -> Option<Escalation> {
        if matches!(fingerprint, Fingerprint::Diff(_)) && !self.window.contains(&fingerprint) {
            self.streak = 0;
        }

        self.window.push_back(fingerprint);
        while self.window.len() > policy.window {
            self.window.pop_front();
        }
        if self.window.len() < policy.window {
            return None;
        }

        let first = self.window.front()?;
        if !self.window.iter().all(|fp| fp == first) {
            return None;
        }
        let reason = match first {
            Fingerprint::RolledBack => format!("last {} iterations rolled back", policy.window),
            other => format!("last {} iterations produced identical fingerprint {other}", policy.window),
        };
        self.window.clear();

        self.streak += 1;
        let level = self.streak;
        let kind = if level >= policy.escalation_window {
            self.streak = 0;
            EscalationKind::RequestHuman
        } else if level % 2 == 1 {
            EscalationKind::WidenScope
        } else {
            EscalationKind::ForceTierUpgrade
        };
        Some(Escalation { kind, level, reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: StagnationPolicy = StagnationPolicy {
        window: 3,
        escalation_window: 3,
    };

    fn feed(state: &mut StagnationState, fps: &[Fingerprint]) -> Vec<Escalation> {
        fps.iter()
            .filter_map(|fp| state.observe(fp.clone(), &POLICY))
            .collect()
    }

    #[test]
    fn three_identical_fingerprints_escalate_once() {
        let mut state = StagnationState::default();
        let same = Fingerprint::Diff("abc".to_string());
        let events = feed(&mut state, &[same.clone(), same.clone(), same]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EscalationKind::WidenScope);
        assert!(state.window.is_empty());
    }

    #[test]
    fn mixed_fingerprints_do_not_escalate() {
        let mut state = StagnationState::default();
        let events = feed(
            &mut state,
            &[
                Fingerprint::RolledBack,
                Fingerprint::Diff("a".to_string()),
                Fingerprint::RolledBack,
                Fingerprint::NoOp,
            ],
        );
        assert!(events.is_empty());
    }

    #[test]
    fn ladder_reaches_human_after_second_window_of_escalations() {
        let mut state = StagnationState::default();
        let rolled = vec![Fingerprint::RolledBack; 9];
        let kinds: Vec<EscalationKind> = feed(&mut state, &rolled).into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EscalationKind::WidenScope,
                EscalationKind::ForceTierUpgrade,
                EscalationKind::RequestHuman,
            ]
        );
        assert_eq!(state.streak, 0);
    }

    #[test]
    fn new_progress_resets_the_streak() {
        let mut state = StagnationState::default();
        feed(&mut state, &vec![Fingerprint::RolledBack; 3]);
        assert_eq!(state.streak, 1);
        feed(&mut state, &[Fingerprint::Diff("fresh".to_string())]);
        assert_eq!(state.streak, 0);
    }

    #[test]
    fn display_shortens_hashes_by_character() {
        let hex = Fingerprint::Diff("0123456789abcdef".to_string());
        assert_eq!(hex.to_string(), "diff:0123456789ab");
        let edited = Fingerprint::Diff("ééééééééééééé".to_string());
        assert_eq!(edited.to_string(), "diff:éééééééééééé");
        assert_eq!(Fingerprint::Diff("ab".to_string()).to_string(), "diff:ab");
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = StagnationState::default();
        state.observe(Fingerprint::Diff("h".to_string()), &POLICY);
        state.observe(Fingerprint::NoOp, &POLICY);
        let json = serde_json::to_string(&state).expect("serialize");
        let back: StagnationState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, state);
    }
}
