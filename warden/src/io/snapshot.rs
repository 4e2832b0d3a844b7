//! Snapshot Manager: immutable captures of the tracked live tree.
//!
//! Layout: `.warden/snapshots/<id>/manifest.json` plus `files/<rel path>`.
//! A snapshot is assembled under a temporary name and renamed into place, so
//! a directory named like an id is always complete.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::core::fault::InvariantViolation;
use crate::core::stagnation::Fingerprint;
use crate::core::tracking::{Tracking, to_rel_string};
use crate::core::types::SnapshotId;
use crate::core::validator::ExistingTree;
use crate::io::atomic::write_json_atomic;
use crate::io::init::WardenPaths;
use crate::io::swap::{self, remove_dir};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub id: SnapshotId,
    pub created_at: String,
    /// Digest over every (path, sha256) pair; equal digests mean equal trees.
    pub digest: String,
    pub files: BTreeMap<String, FileEntry>,
}

/// Whether a restore had to touch the live tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    AlreadyCurrent,
    Restored,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    live: PathBuf,
    snapshots_dir: PathBuf,
    shadow_dir: PathBuf,
    retired_dir: PathBuf,
    journal_path: PathBuf,
    tracking: Tracking,
}

impl SnapshotStore {
    /// Open the store, finishing or undoing any swap a crash interrupted.
    #[instrument(skip_all, fields(root = %paths.root.display()))]
    pub fn open(paths: &WardenPaths, tracking: Tracking) -> Result<Self> {
        let store = Self {
            live: paths.live_dir.clone(),
            snapshots_dir: paths.snapshots_dir.clone(),
            shadow_dir: paths.shadow_dir.clone(),
            retired_dir: paths.retired_dir.clone(),
            journal_path: paths.swap_journal_path.clone(),
            tracking,
        };
        fs::create_dir_all(&store.snapshots_dir)
            .with_context(|| format!("create directory {}", store.snapshots_dir.display()))?;
        if let Some(recovery) = swap::recover(&store.journal_path, &store.tracking)? {
            warn!(?recovery, "live tree repaired after interrupted swap");
        }
        remove_dir(&store.shadow_dir)?;
        Ok(store)
    }

    pub fn live_dir(&self) -> &Path {
        &self.live
    }

    pub fn tracking(&self) -> &Tracking {
        &self.tracking
    }

    /// Capture every tracked file of the live tree under the next id.
    #[instrument(skip_all)]
    pub fn create(&self, created_at: &str) -> Result<SnapshotId> {
        let id = self.next_id()?;
        self.create_with_id(&id, created_at)?;
        Ok(id)
    }

    fn create_with_id(&self, id: &SnapshotId, created_at: &str) -> Result<()> {
        let final_dir = self.snapshot_dir(id);
        if final_dir.exists() {
            return Err(InvariantViolation(format!("duplicate snapshot id {id}")).into());
        }
        let tmp_dir = self.snapshots_dir.join(format!(".tmp-{id}"));
        remove_dir(&tmp_dir)?;
        let files_dir = tmp_dir.join("files");
        fs::create_dir_all(&files_dir)
            .with_context(|| format!("create directory {}", files_dir.display()))?;

        let mut files = BTreeMap::new();
        for rel in tracked_files(&self.live, &self.tracking)? {
            let source = self.live.join(&rel);
            let bytes = fs::read(&source).with_context(|| format!("read {}", source.display()))?;
            let dest = files_dir.join(&rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create directory {}", parent.display()))?;
            }
            fs::write(&dest, &bytes).with_context(|| format!("write {}", dest.display()))?;
            files.insert(
                rel,
                FileEntry {
                    sha256: hex::encode(Sha256::digest(&bytes)),
                    bytes: bytes.len() as u64,
                },
            );
        }

        let manifest = Manifest {
            id: id.clone(),
            created_at: created_at.to_string(),
            digest: tree_digest(&files),
            files,
        };
        write_json_atomic(&tmp_dir.join("manifest.json"), &manifest)?;
        fs::rename(&tmp_dir, &final_dir)
            .with_context(|| format!("publish snapshot {}", final_dir.display()))?;
        info!(snapshot = %id, files = manifest.files.len(), "snapshot created");
        Ok(())
    }

    pub fn manifest(&self, id: &SnapshotId) -> Result<Manifest> {
        let path = self.snapshot_dir(id).join("manifest.json");
        if !path.is_file() {
            return Err(InvariantViolation(format!("snapshot {id} does not exist")).into());
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
    }

    /// All published snapshot ids in ascending order.
    pub fn list(&self) -> Result<Vec<SnapshotId>> {
        let mut ids = Vec::new();
        let entries = fs::read_dir(&self.snapshots_dir)
            .with_context(|| format!("read {}", self.snapshots_dir.display()))?;
        for entry in entries {
            let entry = entry.with_context(|| format!("read {}", self.snapshots_dir.display()))?;
            if let Some(id) = entry.file_name().to_str().and_then(SnapshotId::parse) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn latest(&self) -> Result<Option<SnapshotId>> {
        Ok(self.list()?.pop())
    }

    fn next_id(&self) -> Result<SnapshotId> {
        let next = self.latest()?.map_or(1, |id| id.sequence() + 1);
        Ok(SnapshotId::from_sequence(next))
    }

    /// Digest of the live tree's tracked content, comparable with [`Manifest::digest`].
    pub fn live_digest(&self) -> Result<String> {
        let mut files = BTreeMap::new();
        for rel in tracked_files(&self.live, &self.tracking)? {
            let path = self.live.join(&rel);
            let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
            files.insert(
                rel,
                FileEntry {
                    sha256: hex::encode(Sha256::digest(&bytes)),
                    bytes: bytes.len() as u64,
                },
            );
        }
        Ok(tree_digest(&files))
    }

    /// Copy a snapshot's files into `dest`, which must not exist yet.
    pub fn materialize(&self, id: &SnapshotId, dest: &Path) -> Result<Manifest> {
        let manifest = self.manifest(id)?;
        let files_dir = self.snapshot_dir(id).join("files");
        fs::create_dir_all(dest).with_context(|| format!("create directory {}", dest.display()))?;
        for rel in manifest.files.keys() {
            let target = dest.join(rel);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create directory {}", parent.display()))?;
            }
            let source = files_dir.join(rel);
            fs::copy(&source, &target)
                .with_context(|| format!("copy {} to {}", source.display(), target.display()))?;
        }
        Ok(manifest)
    }

    /// Make the live tree's tracked content equal the snapshot's.
    ///
    /// Idempotent: when the live digest already matches, nothing is touched.
    #[instrument(skip_all, fields(snapshot = %id))]
    pub fn restore(&self, id: &SnapshotId) -> Result<RestoreOutcome> {
        let manifest = self.manifest(id)?;
        if self.live.exists() && self.live_digest()? == manifest.digest {
            debug!("live tree already matches snapshot");
            return Ok(RestoreOutcome::AlreadyCurrent);
        }
        remove_dir(&self.shadow_dir)?;
        self.materialize(id, &self.shadow_dir)?;
        self.swap_in(&self.shadow_dir)?;
        info!("live tree restored");
        Ok(RestoreOutcome::Restored)
    }

    /// Replace the live tree with `staged` through the journaled swap.
    pub fn swap_in(&self, staged: &Path) -> Result<()> {
        swap::swap_in(
            &self.journal_path,
            staged,
            &self.live,
            &self.retired_dir,
            &self.tracking,
        )
    }

    pub fn view(&self, id: &SnapshotId) -> Result<SnapshotView> {
        Ok(SnapshotView {
            files_dir: self.snapshot_dir(id).join("files"),
            manifest: self.manifest(id)?,
        })
    }

    pub fn diff(&self, from: &SnapshotId, to: &SnapshotId) -> Result<DiffSummary> {
        Ok(DiffSummary::between(&self.manifest(from)?, &self.manifest(to)?))
    }

    /// Human-readable change summary between two snapshots.
    pub fn diff_summary(&self, from: &SnapshotId, to: &SnapshotId) -> Result<String> {
        Ok(self.diff(from, to)?.to_string())
    }

    fn snapshot_dir(&self, id: &SnapshotId) -> PathBuf {
        self.snapshots_dir.join(id.as_str())
    }
}

/// Read-only view of one snapshot, used as the validator's existing tree.
#[derive(Debug, Clone)]
pub struct SnapshotView {
    files_dir: PathBuf,
    manifest: Manifest,
}

impl SnapshotView {
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.manifest.files.keys().map(String::as_str)
    }
}

impl ExistingTree for SnapshotView {
    fn contains(&self, path: &str) -> bool {
        self.manifest.files.contains_key(path)
    }

    fn read(&self, path: &str) -> Option<String> {
        if !self.contains(path) {
            return None;
        }
        fs::read_to_string(self.files_dir.join(path)).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub path: String,
    pub kind: ChangeKind,
    pub bytes_before: u64,
    pub bytes_after: u64,
    /// Content hash after the change; empty for removals.
    pub sha256_after: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub entries: Vec<DiffEntry>,
}

impl DiffSummary {
    pub fn between(before: &Manifest, after: &Manifest) -> Self {
        let mut entries = Vec::new();
        for (path, old) in &before.files {
            match after.files.get(path) {
                None => entries.push(DiffEntry {
                    path: path.clone(),
                    kind: ChangeKind::Removed,
                    bytes_before: old.bytes,
                    bytes_after: 0,
                    sha256_after: String::new(),
                }),
                Some(new) if new.sha256 != old.sha256 => entries.push(DiffEntry {
                    path: path.clone(),
                    kind: ChangeKind::Modified,
                    bytes_before: old.bytes,
                    bytes_after: new.bytes,
                    sha256_after: new.sha256.clone(),
                }),
                Some(_) => {}
            }
        }
        for (path, new) in &after.files {
            if !before.files.contains_key(path) {
                entries.push(DiffEntry {
                    path: path.clone(),
                    kind: ChangeKind::Added,
                    bytes_before: 0,
                    bytes_after: new.bytes,
                    sha256_after: new.sha256.clone(),
                });
            }
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stagnation fingerprint: hash of the sorted change list, or `NoOp`.
    pub fn fingerprint(&self) -> Fingerprint {
        if self.entries.is_empty() {
            return Fingerprint::NoOp;
        }
        let mut hasher = Sha256::new();
        for entry in &self.entries {
            hasher.update(entry.path.as_bytes());
            hasher.update([0u8]);
            hasher.update(entry.sha256_after.as_bytes());
            hasher.update(b"\n");
        }
        Fingerprint::Diff(hex::encode(hasher.finalize()))
    }
}

impl fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return writeln!(f, "no changes");
        }
        for entry in &self.entries {
            match entry.kind {
                ChangeKind::Added => writeln!(f, "A {} ({} bytes)", entry.path, entry.bytes_after)?,
                ChangeKind::Removed => writeln!(f, "D {} ({} bytes)", entry.path, entry.bytes_before)?,
                ChangeKind::Modified => writeln!(
                    f,
                    "M {} ({} -> {} bytes)",
                    entry.path, entry.bytes_before, entry.bytes_after
                )?,
            }
        }
        Ok(())
    }
}

/// Relative paths of tracked regular files under `root`, sorted.
pub fn tracked_files(root: &Path, tracking: &Tracking) -> Result<Vec<String>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    let walker = WalkDir::new(root).min_depth(1).sort_by_file_name().into_iter();
    for entry in walker.filter_entry(|entry| {
        entry
            .path()
            .strip_prefix(root)
            .ok()
            .and_then(to_rel_string)
            .is_some_and(|rel| tracking.is_tracked(&rel))
    }) {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let Some(rel) = entry.path().strip_prefix(root).ok().and_then(to_rel_string) else {
            continue;
        };
        if !entry.file_type().is_file() {
            warn!(path = %rel, "skipping non-regular file");
            continue;
        }
        files.push(rel);
    }
    files.sort();
    Ok(files)
}

fn tree_digest(files: &BTreeMap<String, FileEntry>) -> String {
    let mut hasher = Sha256::new();
    for (path, entry) in files {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(entry.sha256.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestWorkspace;

    fn store(ws: &TestWorkspace) -> SnapshotStore {
        SnapshotStore::open(ws.paths(), ws.config().tracking()).expect("open store")
    }

    #[test]
    fn create_captures_tracked_files_only() {
        let ws = TestWorkspace::new();
        ws.write_live("src/lib.rs", "pub fn a() {}\n");
        ws.write_live("target/debug/app", "binary");
        ws.write_live(".git/HEAD", "ref: main");
        let store = store(&ws);

        let id = store.create("2026-01-01T00:00:00Z").expect("create");
        let manifest = store.manifest(&id).expect("manifest");
        let paths: Vec<&str> = manifest.files.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["src/lib.rs"]);
    }

    #[test]
    fn ids_are_monotonic() {
        let ws = TestWorkspace::new();
        let store = store(&ws);
        let a = store.create("t").expect("create");
        let b = store.create("t").expect("create");
        assert!(b.sequence() > a.sequence());
    }

    #[test]
    fn duplicate_id_is_an_invariant_violation() {
        let ws = TestWorkspace::new();
        let store = store(&ws);
        let id = store.create("t").expect("create");
        let err = store.create_with_id(&id, "t").unwrap_err();
        assert!(err.downcast_ref::<InvariantViolation>().is_some());
    }

    #[test]
    fn restore_is_idempotent_and_keeps_excluded_entries() {
        let ws = TestWorkspace::new();
        ws.write_live("a.txt", "one");
        ws.write_live(".git/HEAD", "ref: main");
        let store = store(&ws);
        let s0 = store.create("t").expect("create");

        ws.write_live("a.txt", "two");
        ws.write_live("b.txt", "extra");

        assert_eq!(store.restore(&s0).expect("restore"), RestoreOutcome::Restored);
        let after_first = store.live_digest().expect("digest");
        assert_eq!(store.restore(&s0).expect("restore"), RestoreOutcome::AlreadyCurrent);
        assert_eq!(store.live_digest().expect("digest"), after_first);

        assert_eq!(ws.read_live("a.txt").as_deref(), Some("one"));
        assert_eq!(ws.read_live("b.txt"), None);
        assert_eq!(ws.read_live(".git/HEAD").as_deref(), Some("ref: main"));
    }

    #[test]
    fn diff_summary_lists_changes_and_fingerprints() {
        let ws = TestWorkspace::new();
        ws.write_live("keep.txt", "same");
        ws.write_live("edit.txt", "v1");
        ws.write_live("gone.txt", "bye");
        let store = store(&ws);
        let before = store.create("t").expect("create");

        ws.write_live("edit.txt", "version 2");
        ws.remove_live("gone.txt");
        ws.write_live("new.txt", "hi");
        let after = store.create("t").expect("create");

        let text = store.diff_summary(&before, &after).expect("diff");
        assert_eq!(
            text,
            "M edit.txt (2 -> 9 bytes)\nD gone.txt (3 bytes)\nA new.txt (2 bytes)\n"
        );
        assert!(matches!(
            store.diff(&before, &after).expect("diff").fingerprint(),
            Fingerprint::Diff(_)
        ));
        assert_eq!(
            store.diff(&after, &after).expect("diff").fingerprint(),
            Fingerprint::NoOp
        );
    }

    #[test]
    fn missing_snapshot_is_an_invariant_violation() {
        let ws = TestWorkspace::new();
        let store = store(&ws);
        let err = store.manifest(&SnapshotId::from_sequence(42)).unwrap_err();
        assert!(err.downcast_ref::<InvariantViolation>().is_some());
    }
}
