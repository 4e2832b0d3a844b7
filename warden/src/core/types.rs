//! Shared deterministic types for the warden core.
//!
//! These types are the persisted data model. They must not depend on external
//! state, and their field order is part of the on-disk format.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a task in the queue (monotonic, never reused).
pub type TaskId = u64;

/// Identifier of an immutable snapshot (`s000001`, `s000002`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn from_sequence(seq: u64) -> Self {
        Self(format!("s{seq:06}"))
    }

    /// Parse a directory name back into an id. Returns `None` for foreign names.
    pub fn parse(raw: &str) -> Option<Self> {
        let digits = raw.strip_prefix('s')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn sequence(&self) -> u64 {
        self.0
            .strip_prefix('s')
            .and_then(|digits| digits.parse().ok())
            .unwrap_or(0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Model-completion capability class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Cheap, quick completions (planning, simple edits).
    Fast,
    /// Expensive, slower completions with more reasoning headroom.
    Strong,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Fast => "fast",
            Tier::Strong => "strong",
        }
    }

    /// Memory tag used to attribute entries to this tier.
    pub fn tag(&self) -> String {
        format!("tier:{}", self.as_str())
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a task. Tasks are only transitioned, never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Stuck,
}

/// A unit of planned work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub status: TaskStatus,
    /// Number of times the task has been requeued after a failed iteration.
    pub attempts: u32,
    pub created_at: String,
    /// Validation rejections in a row; reset when the task commits.
    #[serde(default)]
    pub consecutive_rejections: u32,
    /// Task this one was created to remediate, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediates: Option<TaskId>,
}

impl Task {
    /// Memory tag used to attribute entries to this task.
    pub fn tag(&self) -> String {
        task_tag(self.id)
    }
}

pub fn task_tag(id: TaskId) -> String {
    format!("task:{id}")
}

/// Terminal outcome of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Committed,
    RolledBack,
    FallbackRecovered,
    Fatal,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Committed => "committed",
            Outcome::RolledBack => "rolled_back",
            Outcome::FallbackRecovered => "fallback_recovered",
            Outcome::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which pipeline produced the iteration record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathTaken {
    Primary,
    Fallback,
}

/// Orchestrator state machine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Plan,
    Stage,
    Validate,
    Commit,
    Rollback,
    Record,
    Done,
    Fallback,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Plan => "plan",
            Phase::Stage => "stage",
            Phase::Validate => "validate",
            Phase::Commit => "commit",
            Phase::Rollback => "rollback",
            Phase::Record => "record",
            Phase::Done => "done",
            Phase::Fallback => "fallback",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only memory log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub timestamp: String,
    pub summary: String,
    pub tags: Vec<String>,
}

impl MemoryEntry {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|tag| self.has_tag(tag))
    }
}

/// Tier selection for one model call. Logged inside the iteration record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub task_id: TaskId,
    pub tier: Tier,
    pub degraded: bool,
    pub reason: String,
}

/// One validator finding, attributed to a file of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub file: String,
    pub reason: String,
}

impl Diagnostic {
    pub fn new(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.file, self.reason)
    }
}

/// Result of one validation call. Never persisted outside the iteration record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    pub fn from_diagnostics(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            passed: diagnostics.is_empty(),
            diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_ids_sort_by_sequence() {
        let a = SnapshotId::from_sequence(9);
        let b = SnapshotId::from_sequence(10);
        assert!(a < b);
        assert_eq!(b.as_str(), "s000010");
        assert_eq!(b.sequence(), 10);
    }

    #[test]
    fn snapshot_id_parse_rejects_foreign_names() {
        assert!(SnapshotId::parse("s000001").is_some());
        assert!(SnapshotId::parse(".tmp-s000001").is_none());
        assert!(SnapshotId::parse("s").is_none());
        assert!(SnapshotId::parse("sabc").is_none());
    }

    #[test]
    fn task_status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::InProgress).expect("serialize");
        assert_eq!(json, "\"in_progress\"");
        let json = serde_json::to_string(&Outcome::FallbackRecovered).expect("serialize");
        assert_eq!(json, "\"fallback_recovered\"");
    }

    #[test]
    fn validation_result_passes_only_without_diagnostics() {
        assert!(ValidationResult::from_diagnostics(Vec::new()).passed);
        let failed = ValidationResult::from_diagnostics(vec![Diagnostic::new("a.rs", "bad")]);
        assert!(!failed.passed);
    }
}
