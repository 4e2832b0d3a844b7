//! Run state carried between invocations (`.warden/state/run_state.json`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::stagnation::StagnationState;
use crate::core::types::{Diagnostic, SnapshotId, TaskId};
use crate::io::atomic::write_json_atomic;

/// Persisted bookkeeping shared by consecutive invocations.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunState {
    /// Snapshot the live tree matched after the last commit (or the baseline).
    pub last_committed: Option<SnapshotId>,
    #[serde(default)]
    pub stagnation: StagnationState,
    /// Widened scope hint injected into the next patch prompt.
    #[serde(default)]
    pub scope_hint: Option<String>,
    /// Route the next patch call to the strong tier regardless of heuristics.
    #[serde(default)]
    pub force_strong_tier: bool,
    /// Diagnostics of the most recent validation rejection, replayed into the
    /// next prompt for the same task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rejection: Option<Rejection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rejection {
    pub task_id: TaskId,
    pub diagnostics: Vec<Diagnostic>,
}

impl RunState {
    /// Rejection diagnostics to show when retrying `task_id`.
    pub fn rejection_for(&self, task_id: TaskId) -> &[Diagnostic] {
        match &self.last_rejection {
            Some(rejection) if rejection.task_id == task_id => &rejection.diagnostics,
            _ => &[],
        }
    }
}

/// Load run state from disk. A missing file yields the default state.
pub fn load_run_state(path: &Path) -> Result<RunState> {
    debug!(path = %path.display(), "loading run state");
    if !path.exists() {
        return Ok(RunState::default());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run state {}", path.display()))?;
    let state: RunState = serde_json::from_str(&contents)
        .with_context(|| format!("parse run state {}", path.display()))?;
    debug!(last_committed = ?state.last_committed, streak = state.stagnation.streak, "run state loaded");
    Ok(state)
}

/// Atomically write run state to disk (temp file + rename).
pub fn write_run_state(path: &Path, state: &RunState) -> Result<()> {
    debug!(path = %path.display(), last_committed = ?state.last_committed, "writing run state");
    write_json_atomic(path, state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stagnation::Fingerprint;

    #[test]
    fn run_state_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("run_state.json");

        let mut state = RunState {
            last_committed: Some(SnapshotId::from_sequence(3)),
            scope_hint: Some("consider the whole module".to_string()),
            force_strong_tier: true,
            ..RunState::default()
        };
        state.stagnation.window.push_back(Fingerprint::RolledBack);
        state.stagnation.streak = 1;

        write_run_state(&path, &state).expect("write");
        assert_eq!(load_run_state(&path).expect("load"), state);
    }

    #[test]
    fn run_state_defaults_are_deterministic() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("run_state.json");
        write_run_state(&path, &RunState::default()).expect("write");
        let contents = fs::read_to_string(&path).expect("read");
        let expected = "{\n  \"last_committed\": null,\n  \"stagnation\": {\n    \"window\": [],\n    \"streak\": 0\n  },\n  \"scope_hint\": null,\n  \"force_strong_tier\": false\n}\n";
        assert_eq!(contents, expected);
    }

    #[test]
    fn missing_file_is_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = load_run_state(&temp.path().join("none.json")).expect("load");
        assert_eq!(state, RunState::default());
    }
}
