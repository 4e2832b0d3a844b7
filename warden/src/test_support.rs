//! Test-only fixtures: a scratch warden root, a scripted model and a
//! recording notifier.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use serde_json::json;
use tempfile::TempDir;

use crate::core::fault::TransportError;
use crate::core::record::IterationRecord;
use crate::core::types::{MemoryEntry, TaskId, Tier};
use crate::io::config::{WardenConfig, write_config};
use crate::io::history::IterationHistory;
use crate::io::init::{InitOptions, WardenPaths, init_workspace};
use crate::io::model::{CompletionRequest, ModelClient};
use crate::io::notify::Notifier;
use crate::io::queue::TaskQueue;
use crate::io::run_state::{RunState, load_run_state};
use crate::io::snapshot::SnapshotStore;

/// An initialized warden root in a temporary directory.
pub struct TestWorkspace {
    _temp: TempDir,
    paths: WardenPaths,
    config: WardenConfig,
}

impl TestWorkspace {
    /// Initialized root with retry backoff disabled.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut WardenConfig)) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let (paths, mut config) =
            init_workspace(temp.path(), &InitOptions::default()).expect("init workspace");
        config.model.retry_backoff_ms = 0;
        adjust(&mut config);
        config.validate().expect("test config is valid");
        write_config(&paths.config_path, &config).expect("write config");
        Self {
            _temp: temp,
            paths,
            config,
        }
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    pub fn paths(&self) -> &WardenPaths {
        &self.paths
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    pub fn store(&self) -> SnapshotStore {
        SnapshotStore::open(&self.paths, self.config.tracking()).expect("open snapshot store")
    }

    pub fn write_live(&self, rel: &str, content: &str) {
        let path = self.paths.live_dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create live parent");
        }
        fs::write(&path, content).expect("write live file");
    }

    pub fn read_live(&self, rel: &str) -> Option<String> {
        fs::read_to_string(self.paths.live_dir.join(rel)).ok()
    }

    pub fn remove_live(&self, rel: &str) {
        fs::remove_file(self.paths.live_dir.join(rel)).expect("remove live file");
    }

    pub fn write_goal(&self, goal: &str) {
        fs::write(&self.paths.goal_path, goal).expect("write goal");
    }

    pub fn queue(&self) -> TaskQueue {
        TaskQueue::load(&self.paths.tasks_path).expect("load queue")
    }

    pub fn enqueue(&self, description: &str) -> TaskId {
        self.queue()
            .enqueue(description, &crate::io::now_rfc3339(), None)
            .expect("enqueue")
    }

    pub fn history(&self) -> Vec<IterationRecord> {
        IterationHistory::new(&self.paths.history_path)
            .all()
            .expect("read history")
    }

    pub fn memory(&self) -> Vec<MemoryEntry> {
        match fs::read_to_string(&self.paths.memory_path) {
            Ok(contents) => contents
                .lines()
                .filter_map(|line| serde_json::from_str(line).ok())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn run_state(&self) -> RunState {
        load_run_state(&self.paths.run_state_path).expect("load run state")
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a patch response the way a well-behaved model would.
pub fn patch_response(summary: &str, changes: &[(&str, Option<&str>)]) -> String {
    let changes: Vec<_> = changes
        .iter()
        .map(|(path, content)| json!({ "path": path, "content": content }))
        .collect();
    json!({ "summary": summary, "changes": changes }).to_string()
}

#[derive(Debug, Clone)]
enum Scripted {
    Reply(String),
    Timeout,
    Fail(String),
}

/// One call seen by [`ScriptedModel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub tier: Tier,
    pub context: String,
    pub prompt: String,
}

/// Model that plays back a queue of replies and failures. An exhausted
/// script fails every further call.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Scripted::Reply(text.into()));
        self
    }

    pub fn timeout(self) -> Self {
        self.push(Scripted::Timeout);
        self
    }

    pub fn fail(self, reason: impl Into<String>) -> Self {
        self.push(Scripted::Fail(reason.into()));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn push(&self, item: Scripted) {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(item);
    }
}

impl ModelClient for ScriptedModel {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, TransportError> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(RecordedCall {
                tier: request.tier,
                context: request.context.to_string(),
                prompt: request.prompt.to_string(),
            });
        let next = self
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        match next {
            Some(Scripted::Reply(text)) => Ok(text),
            Some(Scripted::Timeout) => Err(TransportError::timeout(request.tier, request.timeout)),
            Some(Scripted::Fail(reason)) => Err(TransportError::failed(request.tier, reason)),
            None => Err(TransportError::failed(request.tier, "script exhausted")),
        }
    }
}

/// Notifier that keeps every message in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, subject: &str, body: &str) -> Result<()> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((subject.to_string(), body.to_string()));
        Ok(())
    }
}
