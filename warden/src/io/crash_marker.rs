//! Crash marker: written at INIT, cleared at DONE.
//!
//! Finding one at startup means the previous invocation never reached RECORD.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::io::atomic::write_json_atomic;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerContents {
    pub iteration_id: u64,
    pub started_at: String,
    pub pid: u32,
}

#[derive(Debug, Clone)]
pub struct CrashMarker {
    path: PathBuf,
}

impl CrashMarker {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Contents of a marker left behind, if any. An unreadable marker still
    /// counts as present.
    pub fn find(&self) -> Result<Option<MarkerContents>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read crash marker {}", self.path.display()))?;
        match serde_json::from_str(&contents) {
            Ok(marker) => Ok(Some(marker)),
            Err(err) => {
                warn!(err = %err, "crash marker is unreadable");
                Ok(Some(MarkerContents {
                    iteration_id: 0,
                    started_at: String::new(),
                    pid: 0,
                }))
            }
        }
    }

    pub fn write(&self, iteration_id: u64, started_at: &str) -> Result<()> {
        write_json_atomic(
            &self.path,
            &MarkerContents {
                iteration_id,
                started_at: started_at.to_string(),
                pid: std::process::id(),
            },
        )
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("clear crash marker {}", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_find_clear() {
        let temp = tempfile::tempdir().expect("tempdir");
        let marker = CrashMarker::new(&temp.path().join("CRASH_MARKER"));
        assert_eq!(marker.find().expect("find"), None);

        marker.write(7, "2026-01-01T00:00:00Z").expect("write");
        let found = marker.find().expect("find").expect("marker");
        assert_eq!(found.iteration_id, 7);

        marker.clear().expect("clear");
        marker.clear().expect("clear twice");
        assert_eq!(marker.find().expect("find"), None);
    }

    #[test]
    fn garbage_marker_counts_as_present() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("CRASH_MARKER");
        fs::write(&path, "not json").expect("write");
        assert!(CrashMarker::new(&path).find().expect("find").is_some());
    }
}
