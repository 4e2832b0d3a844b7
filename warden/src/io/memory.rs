//! Memory Store: append-only JSON-lines log of summarized outcomes.
//!
//! Reads stream the file and keep only bounded windows, so the log is never
//! loaded whole and injected context stays bounded as history grows.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::types::MemoryEntry;
use crate::io::atomic::append_json_line;

#[derive(Debug, Clone)]
pub struct MemoryStore {
    path: PathBuf,
}

impl MemoryStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn append(&self, entry: &MemoryEntry) -> Result<()> {
        debug!(tags = ?entry.tags, "memory append");
        append_json_line(&self.path, entry)
    }

    /// The `n` most recent entries plus up to `relevant_cap` older entries
    /// carrying any of `tags`, in chronological order.
    pub fn recent_and_relevant(&self, n: usize, tags: &[String], relevant_cap: usize) -> Result<Vec<MemoryEntry>> {
        let mut recent: VecDeque<(usize, MemoryEntry)> = VecDeque::with_capacity(n + 1);
        let mut relevant: VecDeque<(usize, MemoryEntry)> = VecDeque::with_capacity(relevant_cap + 1);

        self.for_each(|index, entry| {
            // An entry leaving the recent window stays only if it is relevant.
            recent.push_back((index, entry));
            if recent.len() > n
                && let Some((old_index, old)) = recent.pop_front()
                && relevant_cap > 0
                && old.has_any_tag(tags)
            {
                relevant.push_back((old_index, old));
                if relevant.len() > relevant_cap {
                    relevant.pop_front();
                }
            }
        })?;

        Ok(relevant
            .into_iter()
            .chain(recent)
            .map(|(_, entry)| entry)
            .collect())
    }

    /// The last `limit` entries carrying every one of `tags`, in
    /// chronological order.
    pub fn recent_tagged(&self, tags: &[String], limit: usize) -> Result<Vec<MemoryEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut found: VecDeque<MemoryEntry> = VecDeque::with_capacity(limit + 1);
        self.for_each(|_, entry| {
            if tags.iter().all(|tag| entry.has_tag(tag)) {
                found.push_back(entry);
                if found.len() > limit {
                    found.pop_front();
                }
            }
        })?;
        Ok(found.into())
    }

    fn for_each(&self, mut visit: impl FnMut(usize, MemoryEntry)) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let file = File::open(&self.path)
            .with_context(|| format!("open memory log {}", self.path.display()))?;
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("read memory log {}", self.path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MemoryEntry>(&line) {
                Ok(entry) => visit(index, entry),
                Err(err) => warn!(line = index + 1, err = %err, "skipping unreadable memory entry"),
            }
        }
        Ok(())
    }
}
