//! Fallback Agent: the capability-restricted recovery path.
//!
//! The agent only ever talks to a [`RecoveryPort`], whose four methods are
//! the whole of what it may do: restore a snapshot, append one memory entry,
//! enqueue one task, write the iteration record. It never sees a model, the
//! validator, the staging area or the history beyond appending to it.

use std::time::Instant;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::fault::FaultSummary;
use crate::core::record::{FallbackAction, IterationRecord};
use crate::core::recovery::FallbackTrigger;
use crate::core::stagnation::Fingerprint;
use crate::core::types::{
    Diagnostic, MemoryEntry, Outcome, PathTaken, RouteDecision, SnapshotId, Task, TaskId, task_tag,
};

/// Everything the Fallback Agent is allowed to do.
pub trait RecoveryPort {
    /// Make the live tree equal the snapshot.
    fn restore(&mut self, snapshot: &SnapshotId) -> Result<()>;
    /// Append one memory entry.
    fn log(&mut self, entry: &MemoryEntry) -> Result<()>;
    /// Enqueue one task and return its id.
    fn enqueue(&mut self, description: &str, remediates: Option<TaskId>) -> Result<TaskId>;
    /// Persist the iteration record; returns it as stored.
    ///
    /// This is the RECORD phase: the implementation may fold the record into
    /// run-state bookkeeping (stagnation window, escalation flags) before
    /// appending it, but sends nothing outward.
    fn record(&mut self, record: IterationRecord) -> Result<IterationRecord>;
}

/// Context handed to the agent by the orchestrator.
#[derive(Debug, Clone)]
pub struct FallbackRequest {
    pub iteration_id: u64,
    pub timestamp: String,
    pub trigger: FallbackTrigger,
    /// Most recent committed snapshot; the tree is returned to it.
    pub restore_to: SnapshotId,
    pub snapshot_before: SnapshotId,
    /// Task the primary path was working on, if any.
    pub task: Option<Task>,
    pub stuck: Vec<Task>,
    pub routes: Vec<RouteDecision>,
    pub diagnostics: Vec<Diagnostic>,
    pub fault: Option<FaultSummary>,
    pub started: Instant,
}

/// Run the fixed recovery sequence: restore, log, enqueue, record.
///
/// Any error aborts the sequence; the caller treats it as an environment
/// failure.
#[instrument(skip_all, fields(iteration = request.iteration_id, trigger = request.trigger.tag()))]
pub fn run_fallback(port: &mut dyn RecoveryPort, request: FallbackRequest) -> Result<IterationRecord> {
    let description = request.trigger.describe();
    warn!(%description, restore_to = %request.restore_to, "entering fallback");
    let mut actions = Vec::with_capacity(4);

    port.restore(&request.restore_to)?;
    actions.push(FallbackAction::Restore);

    port.log(&memory_entry(&request, &description))?;
    actions.push(FallbackAction::Log);

    let remediation = request.trigger.remediation(request.task.as_ref());
    let remediation_id = port.enqueue(&remediation, request.trigger.task_id())?;
    actions.push(FallbackAction::Enqueue);

    let mut tasks_touched: Vec<TaskId> = request.task.iter().map(|task| task.id).collect();
    if let Some(id) = request.trigger.task_id()
        && !tasks_touched.contains(&id)
    {
        tasks_touched.push(id);
    }
    tasks_touched.push(remediation_id);

    actions.push(FallbackAction::Record);
    let record = IterationRecord {
        iteration_id: request.iteration_id,
        timestamp: request.timestamp,
        path: PathTaken::Fallback,
        tasks_touched,
        snapshot_before: request.snapshot_before,
        snapshot_after: None,
        outcome: Outcome::FallbackRecovered,
        routes: request.routes,
        fingerprint: Some(Fingerprint::Fallback),
        diagnostics: request.diagnostics,
        fault: request.fault,
        fallback_actions: actions,
        escalation: None,
        human_action_needed: false,
        summary: format!("{description}; restored {}; filed task {remediation_id}", request.restore_to),
        duration_ms: request.started.elapsed().as_millis() as u64,
    };
    let record = port.record(record)?;
    info!(remediation = remediation_id, "fallback recovered");
    Ok(record)
}

fn memory_entry(request: &FallbackRequest, description: &str) -> MemoryEntry {
    let mut summary = format!(
        "fallback in iteration {}: {description}; restored {}",
        request.iteration_id, request.restore_to
    );
    if !request.stuck.is_empty() {
        let stuck: Vec<String> = request
            .stuck
            .iter()
            .map(|task| format!("{} ({})", task.id, task.description))
            .collect();
        summary.push_str(&format!("; stuck tasks: {}", stuck.join(", ")));
    }

    let mut tags = vec!["fallback".to_string(), request.trigger.tag().to_string()];
    if let Some(id) = request.trigger.task_id() {
        tags.push(task_tag(id));
    }
    MemoryEntry {
        timestamp: request.timestamp.clone(),
        summary,
        tags,
    }
}
