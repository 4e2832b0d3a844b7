//! Iteration history: one `IterationRecord` per line in `state/iterations.jsonl`.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::core::fault::InvariantViolation;
use crate::core::record::IterationRecord;
use crate::io::atomic::append_json_line;

#[derive(Debug, Clone)]
pub struct IterationHistory {
    path: PathBuf,
}

impl IterationHistory {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Append a record after checking its invariants.
    pub fn append(&self, record: &IterationRecord) -> Result<()> {
        record.check_invariants().map_err(InvariantViolation)?;
        append_json_line(&self.path, record)?;
        info!(
            iteration = record.iteration_id,
            outcome = %record.outcome,
            "iteration recorded"
        );
        Ok(())
    }

    /// Most recent readable record.
    pub fn last(&self) -> Result<Option<IterationRecord>> {
        let mut last = None;
        self.for_each(|record| last = Some(record))?;
        Ok(last)
    }

    pub fn count(&self) -> Result<usize> {
        let mut count = 0;
        self.for_each(|_| count += 1)?;
        Ok(count)
    }

    /// Next iteration id: one past the last recorded id.
    pub fn next_iteration_id(&self) -> Result<u64> {
        Ok(self.last()?.map_or(1, |record| record.iteration_id + 1))
    }

    /// Every record in order. Meant for tests and `status`, not the hot path.
    pub fn all(&self) -> Result<Vec<IterationRecord>> {
        let mut records = Vec::new();
        self.for_each(|record| records.push(record))?;
        Ok(records)
    }

    fn for_each(&self, mut visit: impl FnMut(IterationRecord)) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let file = File::open(&self.path)
            .with_context(|| format!("open history {}", self.path.display()))?;
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("read history {}", self.path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<IterationRecord>(&line) {
                Ok(record) => visit(record),
                Err(err) => warn!(line = index + 1, err = %err, "skipping unreadable iteration record"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Outcome, PathTaken, SnapshotId};

    fn record(id: u64, outcome: Outcome, after: Option<SnapshotId>) -> IterationRecord {
        IterationRecord {
            iteration_id: id,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            path: PathTaken::Primary,
            tasks_touched: Vec::new(),
            snapshot_before: SnapshotId::from_sequence(1),
            snapshot_after: after,
            outcome,
            routes: Vec::new(),
            fingerprint: None,
            diagnostics: Vec::new(),
            fault: None,
            fallback_actions: Vec::new(),
            escalation: None,
            human_action_needed: false,
            summary: String::new(),
            duration_ms: 1,
        }
    }

    #[test]
    fn append_and_read_back() {
        let temp = tempfile::tempdir().expect("tempdir");
        let history = IterationHistory::new(&temp.path().join("iterations.jsonl"));
        assert_eq!(history.next_iteration_id().expect("next"), 1);

        history
            .append(&record(1, Outcome::Committed, Some(SnapshotId::from_sequence(2))))
            .expect("append");
        history.append(&record(2, Outcome::RolledBack, None)).expect("append");

        assert_eq!(history.count().expect("count"), 2);
        assert_eq!(history.next_iteration_id().expect("next"), 3);
        assert_eq!(
            history.last().expect("last").map(|r| r.outcome),
            Some(Outcome::RolledBack)
        );
    }

    #[test]
    fn records_violating_invariants_are_refused() {
        let temp = tempfile::tempdir().expect("tempdir");
        let history = IterationHistory::new(&temp.path().join("iterations.jsonl"));
        let err = history.append(&record(1, Outcome::Committed, None)).unwrap_err();
        assert!(err.downcast_ref::<InvariantViolation>().is_some());
        assert_eq!(history.count().expect("count"), 0);
    }
}
