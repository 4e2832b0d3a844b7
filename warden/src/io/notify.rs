//! One-way human notification channel.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

/// Emits a message for a human. No reply is expected within the iteration.
pub trait Notifier {
    fn notify(&self, subject: &str, body: &str) -> Result<()>;
}

/// Appends timestamped blocks to `.warden/HUMAN_ATTENTION.md`.
#[derive(Debug, Clone)]
pub struct FileNotifier {
    path: PathBuf,
}

impl FileNotifier {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl Notifier for FileNotifier {
    fn notify(&self, subject: &str, body: &str) -> Result<()> {
        warn!(subject, "human attention requested");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        let block = format!(
            "## {} {}\n\n{}\n\n",
            crate::io::now_rfc3339(),
            subject.trim(),
            body.trim()
        );
        file.write_all(block.as_bytes())
            .with_context(|| format!("append {}", self.path.display()))
    }
}
