//! The iteration record: durable proof that one invocation reached an outcome.

use serde::{Deserialize, Serialize};

use crate::core::fault::FaultSummary;
use crate::core::stagnation::{Escalation, Fingerprint};
use crate::core::types::{Diagnostic, Outcome, PathTaken, RouteDecision, SnapshotId, TaskId};

/// Actions the Fallback Agent is allowed to take. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackAction {
    Restore,
    Log,
    Enqueue,
    Record,
}

/// One line of `state/iterations.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration_id: u64,
    pub timestamp: String,
    pub path: PathTaken,
    pub tasks_touched: Vec<TaskId>,
    pub snapshot_before: SnapshotId,
    pub snapshot_after: Option<SnapshotId>,
    pub outcome: Outcome,
    #[serde(default)]
    pub routes: Vec<RouteDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<FaultSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallback_actions: Vec<FallbackAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<Escalation>,
    #[serde(default)]
    pub human_action_needed: bool,
    #[serde(default)]
    pub summary: String,
    pub duration_ms: u64,
}

impl IterationRecord {
    /// `snapshot_after` is set iff the outcome is `committed`.
    pub fn check_invariants(&self) -> Result<(), String> {
        let committed = self.outcome == Outcome::Committed;
        match (committed, &self.snapshot_after) {
            (true, None) => Err(format!(
                "iteration {} committed without snapshot_after",
                self.iteration_id
            )),
            (false, Some(after)) => Err(format!(
                "iteration {} is {} but carries snapshot_after {after}",
                self.iteration_id, self.outcome
            )),
            _ => Ok(()),
        }
    }

    /// The single stdout line for this invocation.
    pub fn status_line(&self) -> String {
        let mut line = format!("{} iteration {}", self.outcome, self.iteration_id);
        if self.human_action_needed {
            line.push_str(" (human action needed)");
        }
        line
    }
}
