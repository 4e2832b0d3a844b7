//! Journaled directory swap: the only primitive that replaces the live tree.
//!
//! Sequence: write journal, rename live -> retired, rename staged -> live,
//! carry excluded entries from retired into live, remove retired, remove
//! journal. Every step is a rename or a delete of something no longer
//! reachable, so [`recover`] can always finish or undo an interrupted swap.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::core::tracking::{Tracking, to_rel_string};
use crate::io::atomic::write_json_atomic;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SwapJournal {
    staged: PathBuf,
    live: PathBuf,
    retired: PathBuf,
}

/// What [`recover`] did with an interrupted swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// The new tree was already in place (or could be moved in); cleanup finished.
    RolledForward,
    /// The swap never started replacing the live tree; staged content discarded.
    Aborted,
}

/// Replace `live` with `staged`. `staged` is consumed.
#[instrument(skip_all, fields(staged = %staged.display(), live = %live.display()))]
pub fn swap_in(journal_path: &Path, staged: &Path, live: &Path, retired: &Path, tracking: &Tracking) -> Result<()> {
    if !staged.is_dir() {
        return Err(anyhow!("staged tree {} does not exist", staged.display()));
    }
    if retired.exists() {
        remove_dir(retired)?;
    }
    let journal = SwapJournal {
        staged: staged.to_path_buf(),
        live: live.to_path_buf(),
        retired: retired.to_path_buf(),
    };
    write_json_atomic(journal_path, &journal)?;

    if live.exists() {
        fs::rename(live, retired)
            .with_context(|| format!("retire live tree {}", live.display()))?;
    }
    fs::rename(staged, live).with_context(|| format!("move staged tree into {}", live.display()))?;
    finish(&journal, tracking)?;
    remove_journal(journal_path)?;
    debug!("swap complete");
    Ok(())
}

/// Finish or undo a swap interrupted by a crash. `Ok(None)` when no journal exists.
#[instrument(skip_all, fields(journal = %journal_path.display()))]
pub fn recover(journal_path: &Path, tracking: &Tracking) -> Result<Option<Recovery>> {
    if !journal_path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(journal_path)
        .with_context(|| format!("read swap journal {}", journal_path.display()))?;
    let journal: SwapJournal = match serde_json::from_str(&contents) {
        Ok(journal) => journal,
        Err(err) => {
            // A torn journal means the first rename never happened.
            warn!(err = %err, "discarding unreadable swap journal");
            remove_journal(journal_path)?;
            return Ok(Some(Recovery::Aborted));
        }
    };

    let live = journal.live.exists();
    let staged = journal.staged.exists();
    let recovery = match (live, staged) {
        (true, true) => {
            remove_dir(&journal.staged)?;
            Recovery::Aborted
        }
        (true, false) => {
            finish(&journal, tracking)?;
            Recovery::RolledForward
        }
        (false, true) => {
            fs::rename(&journal.staged, &journal.live)
                .with_context(|| format!("move staged tree into {}", journal.live.display()))?;
            finish(&journal, tracking)?;
            Recovery::RolledForward
        }
        (false, false) => {
            if journal.retired.exists() {
                fs::rename(&journal.retired, &journal.live).with_context(|| {
                    format!("reinstate retired tree {}", journal.retired.display())
                })?;
            }
            Recovery::Aborted
        }
    };
    remove_journal(journal_path)?;
    info!(?recovery, "recovered interrupted swap");
    Ok(Some(recovery))
}

fn finish(journal: &SwapJournal, tracking: &Tracking) -> Result<()> {
    if journal.retired.exists() {
        carry_excluded(&journal.retired, &journal.live, tracking)?;
        remove_dir(&journal.retired)?;
    }
    Ok(())
}

/// Move untracked entries (`.git`, build output, ...) from the retired tree
/// into the new live tree so a swap only ever replaces tracked content.
fn carry_excluded(retired: &Path, live: &Path, tracking: &Tracking) -> Result<()> {
    let mut walker = WalkDir::new(retired).min_depth(1).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.with_context(|| format!("walk {}", retired.display()))?;
        let Some(rel) = entry
            .path()
            .strip_prefix(retired)
            .ok()
            .and_then(to_rel_string)
        else {
            continue;
        };
        if !tracking.is_excluded(&rel) {
            continue;
        }
        if entry.file_type().is_dir() {
            walker.skip_current_dir();
        }
        let dest = live.join(&rel);
        if dest.exists() {
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::rename(entry.path(), &dest)
            .with_context(|| format!("carry {} into live tree", entry.path().display()))?;
        debug!(path = %rel, "carried excluded entry");
    }
    Ok(())
}

pub(crate) fn remove_dir(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}

fn remove_journal(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove swap journal {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dirs {
        _temp: tempfile::TempDir,
        journal: PathBuf,
        staged: PathBuf,
        live: PathBuf,
        retired: PathBuf,
    }

    fn dirs() -> Dirs {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().to_path_buf();
        Dirs {
            journal: root.join("swap.json"),
            staged: root.join("staging"),
            live: root.join("live"),
            retired: root.join("retired"),
            _temp: temp,
        }
    }

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, contents).expect("write");
    }

    fn tracking() -> Tracking {
        Tracking::new(&[".git"])
    }

    #[test]
    fn swap_replaces_tracked_and_keeps_excluded() {
        let d = dirs();
        write(&d.live.join("a.txt"), "old");
        write(&d.live.join(".git/HEAD"), "ref: main");
        write(&d.staged.join("a.txt"), "new");
        write(&d.staged.join("b.txt"), "added");

        swap_in(&d.journal, &d.staged, &d.live, &d.retired, &tracking()).expect("swap");

        assert_eq!(fs::read_to_string(d.live.join("a.txt")).expect("read"), "new");
        assert_eq!(fs::read_to_string(d.live.join("b.txt")).expect("read"), "added");
        assert_eq!(fs::read_to_string(d.live.join(".git/HEAD")).expect("read"), "ref: main");
        assert!(!d.staged.exists());
        assert!(!d.retired.exists());
        assert!(!d.journal.exists());
    }

    #[test]
    fn recover_without_journal_is_noop() {
        let d = dirs();
        assert_eq!(recover(&d.journal, &tracking()).expect("recover"), None);
    }

    #[test]
    fn recover_aborts_swap_that_never_started() {
        let d = dirs();
        write(&d.live.join("a.txt"), "old");
        write(&d.staged.join("a.txt"), "new");
        write_json_atomic(
            &d.journal,
            &SwapJournal {
                staged: d.staged.clone(),
                live: d.live.clone(),
                retired: d.retired.clone(),
            },
        )
        .expect("journal");

        assert_eq!(recover(&d.journal, &tracking()).expect("recover"), Some(Recovery::Aborted));
        assert_eq!(fs::read_to_string(d.live.join("a.txt")).expect("read"), "old");
        assert!(!d.staged.exists());
        assert!(!d.journal.exists());
    }

    #[test]
    fn recover_rolls_forward_after_live_was_retired() {
        let d = dirs();
        write(&d.retired.join("a.txt"), "old");
        write(&d.retired.join(".git/HEAD"), "ref");
        write(&d.staged.join("a.txt"), "new");
        write_json_atomic(
            &d.journal,
            &SwapJournal {
                staged: d.staged.clone(),
                live: d.live.clone(),
                retired: d.retired.clone(),
            },
        )
        .expect("journal");

        assert_eq!(
            recover(&d.journal, &tracking()).expect("recover"),
            Some(Recovery::RolledForward)
        );
        assert_eq!(fs::read_to_string(d.live.join("a.txt")).expect("read"), "new");
        assert!(d.live.join(".git/HEAD").is_file());
        assert!(!d.retired.exists());
    }

    #[test]
    fn torn_journal_is_discarded() {
        let d = dirs();
        write(&d.journal, "{\"staged\":");
        assert_eq!(recover(&d.journal, &tracking()).expect("recover"), Some(Recovery::Aborted));
        assert!(!d.journal.exists());
    }
}
