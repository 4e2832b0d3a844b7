//! Canonical `.warden/` paths and first-run scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument};

use crate::io::config::{STATE_DIR_NAME, WardenConfig, load_config, write_config};
use crate::io::queue::TaskQueue;
use crate::io::run_state::{RunState, load_run_state, write_run_state};
use crate::io::snapshot::SnapshotStore;

/// All canonical paths for a warden root.
#[derive(Debug, Clone)]
pub struct WardenPaths {
    pub root: PathBuf,
    pub live_dir: PathBuf,
    pub warden_dir: PathBuf,
    pub state_dir: PathBuf,
    pub snapshots_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub shadow_dir: PathBuf,
    pub retired_dir: PathBuf,
    pub iterations_dir: PathBuf,
    pub config_path: PathBuf,
    pub goal_path: PathBuf,
    pub human_attention_path: PathBuf,
    pub tasks_path: PathBuf,
    pub memory_path: PathBuf,
    pub history_path: PathBuf,
    pub run_state_path: PathBuf,
    pub crash_marker_path: PathBuf,
    pub swap_journal_path: PathBuf,
}

impl WardenPaths {
    pub fn new(root: impl Into<PathBuf>, live_dir: &str) -> Self {
        let root = root.into();
        let warden_dir = root.join(STATE_DIR_NAME);
        let state_dir = warden_dir.join("state");
        Self {
            live_dir: root.join(live_dir),
            snapshots_dir: warden_dir.join("snapshots"),
            staging_dir: warden_dir.join("staging"),
            shadow_dir: warden_dir.join("shadow"),
            retired_dir: warden_dir.join("retired"),
            iterations_dir: warden_dir.join("iterations"),
            config_path: config_path(&root),
            goal_path: warden_dir.join("GOAL.md"),
            human_attention_path: warden_dir.join("HUMAN_ATTENTION.md"),
            tasks_path: state_dir.join("tasks.json"),
            memory_path: state_dir.join("memory.jsonl"),
            history_path: state_dir.join("iterations.jsonl"),
            run_state_path: state_dir.join("run_state.json"),
            crash_marker_path: state_dir.join("CRASH_MARKER"),
            swap_journal_path: warden_dir.join("swap.json"),
            state_dir,
            warden_dir,
            root,
        }
    }

    /// Directory holding the artifacts of one iteration.
    pub fn iteration_dir(&self, iteration_id: u64) -> PathBuf {
        self.iterations_dir.join(format!("{iteration_id:06}"))
    }

    pub fn is_initialized(&self) -> bool {
        self.run_state_path.is_file() && self.tasks_path.is_file()
    }
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(STATE_DIR_NAME).join("config.toml")
}

/// Options for `init_workspace`.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Rewrite the config and goal placeholders. History, tasks and snapshots are kept.
    pub force: bool,
}

/// Create `.warden/` scaffolding in `root` and take the baseline snapshot.
///
/// Fails if `.warden/` is already initialized unless `options.force` is set.
#[instrument(skip_all, fields(root = %root.display(), force = options.force))]
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<(WardenPaths, WardenConfig)> {
    let warden_dir = root.join(STATE_DIR_NAME);
    if warden_dir.exists() && !warden_dir.is_dir() {
        return Err(anyhow!("warden init: {STATE_DIR_NAME} exists but is not a directory"));
    }
    let config_file = config_path(root);
    let config = if config_file.exists() && !options.force {
        load_config(&config_file)?
    } else {
        WardenConfig::default()
    };
    let paths = WardenPaths::new(root, &config.live_dir);
    if paths.is_initialized() && !options.force {
        return Err(anyhow!(
            "warden init: {STATE_DIR_NAME} already exists (use --force to overwrite)"
        ));
    }

    for dir in [
        &paths.warden_dir,
        &paths.state_dir,
        &paths.snapshots_dir,
        &paths.iterations_dir,
        &paths.live_dir,
    ] {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }

    if options.force || !config_file.exists() {
        write_config(&config_file, &config)?;
    }
    if options.force || !paths.goal_path.exists() {
        write_file(&paths.goal_path, GOAL_PLACEHOLDER)?;
    }
    if !paths.tasks_path.exists() {
        TaskQueue::create(&paths.tasks_path)?;
    }

    let mut run_state = if paths.run_state_path.exists() {
        load_run_state(&paths.run_state_path)?
    } else {
        RunState::default()
    };
    let store = SnapshotStore::open(&paths, config.tracking())?;
    if run_state.last_committed.is_none() {
        let baseline = match store.latest()? {
            Some(id) => id,
            None => store.create(&crate::io::now_rfc3339())?,
        };
        info!(snapshot = %baseline, "baseline snapshot recorded");
        run_state.last_committed = Some(baseline);
    }
    write_run_state(&paths.run_state_path, &run_state)?;

    Ok((paths, config))
}

/// Open an initialized root, scaffolding it first when `.warden/` is missing.
pub fn ensure_initialized(root: &Path) -> Result<(WardenPaths, WardenConfig)> {
    let config = load_config(&config_path(root))?;
    let paths = WardenPaths::new(root, &config.live_dir);
    if paths.is_initialized() {
        return Ok((paths, config));
    }
    init_workspace(root, &InitOptions { force: false })
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const GOAL_PLACEHOLDER: &str = "# Goal\n\nDescribe what the warden should work toward in the live tree.\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SnapshotId;

    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (paths, config) = init_workspace(temp.path(), &InitOptions::default()).expect("init");

        assert_eq!(config, WardenConfig::default());
        assert!(paths.live_dir.is_dir());
        assert!(paths.state_dir.is_dir());
        assert!(paths.snapshots_dir.is_dir());
        assert!(paths.iterations_dir.is_dir());
        assert!(paths.config_path.is_file());
        assert!(paths.goal_path.is_file());
        assert!(paths.tasks_path.is_file());
        assert!(paths.run_state_path.is_file());

        let state = load_run_state(&paths.run_state_path).expect("run state");
        assert_eq!(state.last_committed, Some(SnapshotId::from_sequence(1)));
    }

    #[test]
    fn init_without_force_refuses_existing_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_workspace(temp.path(), &InitOptions::default()).expect("init");
        let err = init_workspace(temp.path(), &InitOptions::default()).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn init_with_force_rewrites_placeholders_and_keeps_baseline() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (paths, _) = init_workspace(temp.path(), &InitOptions::default()).expect("init");
        fs::write(&paths.goal_path, "custom").expect("write goal");

        init_workspace(temp.path(), &InitOptions { force: true }).expect("re-init");

        assert_eq!(fs::read_to_string(&paths.goal_path).expect("read"), GOAL_PLACEHOLDER);
        let state = load_run_state(&paths.run_state_path).expect("run state");
        assert_eq!(state.last_committed, Some(SnapshotId::from_sequence(1)));
    }

    #[test]
    fn ensure_initialized_scaffolds_fresh_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (paths, _) = ensure_initialized(temp.path()).expect("ensure");
        assert!(paths.is_initialized());
        let (again, _) = ensure_initialized(temp.path()).expect("ensure again");
        assert_eq!(again.root, paths.root);
    }
}
