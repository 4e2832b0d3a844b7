//! Orchestration for a single `warden` invocation.
//!
//! `INIT -> PLAN -> STAGE -> VALIDATE -> {COMMIT | ROLLBACK} -> RECORD -> DONE`,
//! with `FALLBACK` reachable from every phase. Exactly one iteration record is
//! appended per call; only an environment failure that also defeats the
//! Fallback Agent escapes to the caller.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info, instrument, warn};

use crate::core::fault::{EnvironmentError, Fault, FaultClass, FaultSummary, TransportError};
use crate::core::patch::{Patch, parse_patch_response};
use crate::core::plan::parse_plan;
use crate::core::record::IterationRecord;
use crate::core::recovery::{FallbackTrigger, rejection_remediation};
use crate::core::router::{MODEL_OK_TAG, TRANSPORT_TAG, TierSignal, route};
use crate::core::selector::Requeue;
use crate::core::stagnation::{EscalationKind, Fingerprint};
use crate::core::tracking::check_patch_path;
use crate::core::types::{
    Diagnostic, MemoryEntry, Outcome, PathTaken, Phase, RouteDecision, SnapshotId, Task, TaskId,
    TaskStatus, Tier,
};
use crate::core::validator::validate;
use crate::fallback::{FallbackRequest, RecoveryPort, run_fallback};
use crate::io::config::{WardenConfig, load_config};
use crate::io::crash_marker::{CrashMarker, MarkerContents};
use crate::io::history::IterationHistory;
use crate::io::init::{WardenPaths, config_path};
use crate::io::iteration_log::IterationArtifacts;
use crate::io::memory::MemoryStore;
use crate::io::model::{CompletionRequest, ModelClient};
use crate::io::notify::Notifier;
use crate::io::now_rfc3339;
use crate::io::prompt::{PatchInputs, PlanInputs, PromptBuilder, gather_files};
use crate::io::queue::TaskQueue;
use crate::io::run_state::{Rejection, RunState, load_run_state, write_run_state};
use crate::io::snapshot::{SnapshotStore, tracked_files};
use crate::io::swap::remove_dir;

/// Result of one invocation.
#[derive(Debug, Clone)]
pub struct IterationReport {
    /// The record appended to the history.
    pub record: IterationRecord,
    /// Where the prompt, response and diff of this iteration were written.
    pub artifacts_dir: PathBuf,
}

impl IterationReport {
    pub fn status_line(&self) -> String {
        self.record.status_line()
    }
}

/// Run one iteration against an initialized root.
pub fn run_one_iteration<M: ModelClient, N: Notifier>(
    root: &Path,
    model: &M,
    notifier: &N,
) -> Result<IterationReport, EnvironmentError> {
    let started = Instant::now();
    let iteration = Iteration::open(root, model, notifier, started)?;
    iteration.run()
}

/// How the primary path ended.
enum Step {
    /// A committed or rolled-back record, ready to be persisted.
    Recorded(IterationRecord),
    Fallback {
        trigger: FallbackTrigger,
        diagnostics: Vec<Diagnostic>,
        fault: Option<FaultSummary>,
    },
}

struct Iteration<'a, M, N> {
    paths: WardenPaths,
    config: WardenConfig,
    store: SnapshotStore,
    queue: TaskQueue,
    memory: MemoryStore,
    history: IterationHistory,
    run_state: RunState,
    marker: CrashMarker,
    artifacts: IterationArtifacts,
    model: &'a M,
    notifier: &'a N,
    iteration_id: u64,
    timestamp: String,
    started: Instant,
    interrupted: Option<MarkerContents>,
    phase: Phase,
    task: Option<Task>,
    snapshot_before: Option<SnapshotId>,
    routes: Vec<RouteDecision>,
    /// Body of the human notification, sent once the record is durable.
    human_notice: Option<String>,
}

impl<'a, M: ModelClient, N: Notifier> Iteration<'a, M, N> {
    /// INIT: load configuration and every store, then plant the crash marker.
    #[instrument(skip_all, fields(root = %root.display()))]
    fn open(root: &Path, model: &'a M, notifier: &'a N, started: Instant) -> Result<Self> {
        let config = match load_config(&config_path(root)) {
            Ok(config) => config,
            Err(err) => {
                // The history location does not depend on the config.
                let fallback_paths = WardenPaths::new(root, &WardenConfig::default().live_dir);
                let history = IterationHistory::new(&fallback_paths.history_path);
                let iteration_id = history.next_iteration_id().unwrap_or(UNKNOWN_ITERATION);
                record_fatal_without_state(&history, iteration_id, &now_rfc3339(), started, &err);
                return Err(err);
            }
        };
        let paths = WardenPaths::new(root, &config.live_dir);
        if !paths.is_initialized() {
            return Err(anyhow!(
                "{} is not initialized (run `warden init`)",
                root.display()
            ));
        }
        let history = IterationHistory::new(&paths.history_path);
        let timestamp = now_rfc3339();
        let iteration_id = match history.next_iteration_id() {
            Ok(id) => id,
            Err(err) => {
                record_fatal_without_state(&history, UNKNOWN_ITERATION, &timestamp, started, &err);
                return Err(err);
            }
        };

        let marker = CrashMarker::new(&paths.crash_marker_path);
        let loaded = (|| -> Result<_> {
            let store = SnapshotStore::open(&paths, config.tracking())?;
            let queue = TaskQueue::load(&paths.tasks_path)?;
            let run_state = load_run_state(&paths.run_state_path)?;
            let interrupted = marker.find()?;
            marker.write(iteration_id, &timestamp)?;
            Ok((store, queue, run_state, interrupted))
        })();
        let (store, queue, run_state, interrupted) = match loaded {
            Ok(loaded) => loaded,
            Err(err) => {
                record_fatal_without_state(&history, iteration_id, &timestamp, started, &err);
                return Err(err);
            }
        };
        info!(iteration = iteration_id, interrupted = interrupted.is_some(), "iteration started");

        Ok(Self {
            memory: MemoryStore::new(&paths.memory_path),
            artifacts: IterationArtifacts::new(paths.iteration_dir(iteration_id)),
            paths,
            config,
            store,
            queue,
            history,
            run_state,
            marker,
            model,
            notifier,
            iteration_id,
            timestamp,
            started,
            interrupted,
            phase: Phase::Init,
            task: None,
            snapshot_before: None,
            routes: Vec::new(),
            human_notice: None,
        })
    }

    fn run(mut self) -> Result<IterationReport, EnvironmentError> {
        let outcome = match self.interrupted.take() {
            Some(marker) => {
                let task_id = self.reclaim_interrupted();
                self.fallback(
                    FallbackTrigger::CrashMarker {
                        interrupted_iteration: marker.iteration_id,
                        task_id,
                    },
                    Vec::new(),
                    None,
                )
            }
            None => match self.primary() {
                Ok(Step::Recorded(record)) => {
                    self.phase = Phase::Record;
                    match self.persist(record) {
                        Ok(record) => Ok(record),
                        Err(err) => {
                            let fault = Fault::from(err);
                            self.fallback_for_fault(fault)
                        }
                    }
                }
                Ok(Step::Fallback {
                    trigger,
                    diagnostics,
                    fault,
                }) => self.fallback(trigger, diagnostics, fault),
                Err(fault) => self.fallback_for_fault(fault),
            },
        };

        let record = match outcome {
            Ok(record) => record,
            Err(err) => {
                self.record_fatal(&err);
                return Err(EnvironmentError(err));
            }
        };
        self.phase = Phase::Done;
        if let Some(body) = self.human_notice.take()
            && let Err(err) = self.notifier.notify(HUMAN_SUBJECT, &body)
        {
            warn!(err = %format!("{err:#}"), "human notification failed");
        }
        // A leftover marker only sends the next invocation through fallback.
        if let Err(err) = self.marker.clear() {
            warn!(err = %format!("{err:#}"), "could not clear crash marker");
        }
        info!(
            iteration = record.iteration_id,
            outcome = %record.outcome,
            duration_ms = record.duration_ms,
            "iteration finished"
        );
        Ok(IterationReport {
            record,
            artifacts_dir: self.artifacts.dir().to_path_buf(),
        })
    }

    fn primary(&mut self) -> Result<Step, Fault> {
        self.phase = Phase::Plan;
        let before = self.store.create(&self.timestamp)?;
        self.snapshot_before = Some(before.clone());

        let reclaimed = self.queue.reclaim_in_progress(self.config.attempt_cap)?;
        if !reclaimed.is_empty() {
            debug!(?reclaimed, "requeued stale in-progress tasks");
        }
        let task = match self.queue.dequeue_oldest_pending()? {
            Some(task) => task,
            None => {
                self.plan()?;
                self.queue
                    .dequeue_oldest_pending()?
                    .ok_or_else(|| Fault::logic("planning produced no pending task"))?
            }
        };
        info!(task = task.id, attempts = task.attempts, "task selected");
        self.task = Some(task.clone());

        self.phase = Phase::Stage;
        let response = match self.request_patch(&task, &before)? {
            Ok(response) => response,
            Err(transport) => return self.after_transport_failure(&task, &before, transport),
        };
        let patch = match parse_patch_response(&response) {
            Ok(patch) => patch,
            Err(Fault::Validation(diagnostics)) => {
                self.phase = Phase::Validate;
                return self.reject(&task, &before, diagnostics);
            }
            Err(other) => return Err(other),
        };
        let staging_problems = self.stage(&before, &patch)?;

        self.phase = Phase::Validate;
        let view = self.store.view(&before)?;
        let mut result = validate(&patch, &view, &self.config.validation_policy());
        result.diagnostics.extend(staging_problems);
        if !result.diagnostics.is_empty() {
            return self.reject(&task, &before, result.diagnostics);
        }

        self.phase = Phase::Commit;
        self.commit(&task, &before, &patch)
    }

    /// Ask the planning collaborator for new tasks when the queue is dry.
    #[instrument(skip_all, fields(iteration = self.iteration_id))]
    fn plan(&mut self) -> Result<(), Fault> {
        let tree = tracked_files(self.store.live_dir(), self.store.tracking())?;
        let memory = self
            .memory
            .recent_and_relevant(self.config.memory.recent, &[], 0)?
            .into_iter()
            .map(|entry| entry.summary)
            .collect();
        let stuck = self
            .queue
            .list_stuck()
            .into_iter()
            .map(|task| format!("{}: {}", task.id, task.description))
            .collect();
        let prompt = PromptBuilder::new(self.config.prompt.budget_bytes).build_plan(&PlanInputs {
            goal: read_goal(&self.paths.goal_path)?,
            memory,
            tree,
            stuck,
        })?;
        self.artifacts.write("plan_prompt.md", &prompt)?;

        let reply = self
            .complete_with_retries(Tier::Fast, "plan", &prompt, None)?
            .map_err(Fault::Transport)?;
        self.artifacts.write("plan_response.txt", &reply)?;

        let descriptions = parse_plan(&reply);
        if descriptions.is_empty() {
            return Err(Fault::logic("planning collaborator returned no tasks"));
        }
        for description in &descriptions {
            self.queue.enqueue(description, &self.timestamp, None)?;
        }
        info!(planned = descriptions.len(), "tasks planned");
        Ok(())
    }

    /// Route and call the model for a patch. The outer error is a fault of the
    /// iteration itself; the inner one is a transport failure after the whole
    /// call budget was spent.
    fn request_patch(
        &mut self,
        task: &Task,
        before: &SnapshotId,
    ) -> Result<Result<String, TransportError>, Fault> {
        let prompt = self.patch_prompt(task, before)?;
        self.artifacts.write("prompt.md", &prompt)?;
        let force_strong = std::mem::take(&mut self.run_state.force_strong_tier);
        let policy = self.config.router_policy();

        // Routing only needs the trailing run of strong-tier failures, and
        // only up to the degrade threshold.
        let health_tags = [task.tag(), Tier::Strong.tag()];
        let health_window = policy.degrade_after_failures as usize;

        let mut last_error = None;
        for call in 0..self.config.model.max_calls_per_iteration {
            if call > 0 {
                thread::sleep(self.config.model.backoff(call));
            }
            let entries = self.memory.recent_tagged(&health_tags, health_window)?;
            let decision = route(task, &TierSignal::from_memory(task, &entries), force_strong, &policy);
            info!(
                task = task.id,
                tier = %decision.tier,
                degraded = decision.degraded,
                reason = %decision.reason,
                "route decided"
            );
            self.routes.push(decision.clone());
            match self.complete_once(decision.tier, "patch", &prompt, Some(task))? {
                Ok(text) => {
                    self.artifacts.write("response.txt", &text)?;
                    return Ok(Ok(text));
                }
                Err(err) => last_error = Some(err),
            }
        }
        Ok(Err(last_error.unwrap_or_else(|| {
            TransportError::failed(Tier::Fast, "no model call was attempted")
        })))
    }

    fn complete_with_retries(
        &mut self,
        tier: Tier,
        context: &str,
        prompt: &str,
        task: Option<&Task>,
    ) -> Result<Result<String, TransportError>, Fault> {
        let mut last_error = None;
        for call in 0..self.config.model.max_calls_per_iteration {
            if call > 0 {
                thread::sleep(self.config.model.backoff(call));
            }
            match self.complete_once(tier, context, prompt, task)? {
                Ok(text) => return Ok(Ok(text)),
                Err(err) => last_error = Some(err),
            }
        }
        Ok(Err(last_error.unwrap_or_else(|| {
            TransportError::failed(tier, "no model call was attempted")
        })))
    }

    /// One model call. Its success or failure is remembered so the router can
    /// see tier health in later iterations.
    fn complete_once(
        &mut self,
        tier: Tier,
        context: &str,
        prompt: &str,
        task: Option<&Task>,
    ) -> Result<Result<String, TransportError>, Fault> {
        let request = CompletionRequest {
            tier,
            context,
            prompt,
            timeout: self.config.model.timeout(),
        };
        let result = self.model.complete(&request);
        let (summary, status_tag) = match &result {
            Ok(_) => (format!("{context} call on {tier} tier succeeded"), MODEL_OK_TAG),
            Err(err) => {
                warn!(tier = %tier, err = %err, "model call failed");
                (format!("{context} call failed: {err}"), TRANSPORT_TAG)
            }
        };
        let mut tags = vec![status_tag.to_string(), tier.tag()];
        if let Some(task) = task {
            tags.push(task.tag());
        }
        self.memory.append(&MemoryEntry {
            timestamp: now_rfc3339(),
            summary,
            tags,
        })?;
        Ok(result)
    }

    fn patch_prompt(&self, task: &Task, before: &SnapshotId) -> Result<String> {
        let view = self.store.view(before)?;
        let budget = self.config.prompt.budget_bytes;
        let memory = self
            .memory
            .recent_and_relevant(
                self.config.memory.recent,
                &[task.tag()],
                self.config.memory.relevant_cap,
            )?
            .into_iter()
            .map(|entry| entry.summary)
            .collect();
        let files = gather_files(&view, view.paths(), &task.description, budget / 2);
        PromptBuilder::new(budget).build_patch(&PatchInputs {
            goal: read_goal(&self.paths.goal_path)?,
            task: task.clone(),
            scope_hint: self.run_state.scope_hint.clone(),
            diagnostics: self
                .run_state
                .rejection_for(task.id)
                .iter()
                .map(ToString::to_string)
                .collect(),
            memory,
            tree: view.paths().map(str::to_string).collect(),
            files,
        })
    }

    /// Materialize `before` into the staging area and apply the path-safe part
    /// of the patch. Changes that cannot be written come back as diagnostics.
    #[instrument(skip_all, fields(changes = patch.changes.len()))]
    fn stage(&self, before: &SnapshotId, patch: &Patch) -> Result<Vec<Diagnostic>> {
        let staging = &self.paths.staging_dir;
        remove_dir(staging)?;
        self.store.materialize(before, staging)?;

        let mut problems = Vec::new();
        for change in &patch.changes {
            if check_patch_path(&change.path).is_err() || self.store.tracking().is_excluded(&change.path) {
                continue;
            }
            let target = staging.join(&change.path);
            let written = match &change.content {
                Some(content) => write_staged(&target, content),
                None => match fs::remove_file(&target) {
                    Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err),
                    _ => Ok(()),
                },
            };
            if let Err(err) = written {
                problems.push(Diagnostic::new(&change.path, format!("cannot stage change: {err}")));
            }
        }
        Ok(problems)
    }

    fn commit(&mut self, task: &Task, before: &SnapshotId, patch: &Patch) -> Result<Step, Fault> {
        self.store.swap_in(&self.paths.staging_dir)?;
        let after = self.store.create(&now_rfc3339())?;
        let diff = self.store.diff(before, &after)?;
        self.artifacts.write("diff.txt", &diff.to_string())?;
        self.queue.mark_done(task.id)?;

        self.run_state.last_committed = Some(after.clone());
        if !self.run_state.rejection_for(task.id).is_empty() {
            self.run_state.last_rejection = None;
        }
        let fingerprint = diff.fingerprint();
        if matches!(fingerprint, Fingerprint::Diff(_)) {
            self.run_state.scope_hint = None;
        }

        let summary = format!(
            "task {} committed: {} ({} files changed)",
            task.id,
            patch.summary.trim(),
            diff.entries.len()
        );
        self.remember(&summary, task, Outcome::Committed)?;
        info!(task = task.id, snapshot = %after, fingerprint = %fingerprint, "committed");
        Ok(Step::Recorded(IterationRecord {
            tasks_touched: vec![task.id],
            snapshot_after: Some(after),
            outcome: Outcome::Committed,
            fingerprint: Some(fingerprint),
            summary,
            ..self.blank_record(before)
        }))
    }

    /// ROLLBACK after a validation rejection.
    fn reject(&mut self, task: &Task, before: &SnapshotId, diagnostics: Vec<Diagnostic>) -> Result<Step, Fault> {
        warn!(task = task.id, diagnostics = diagnostics.len(), "patch rejected");
        let fault = Some(FaultSummary::new(&Fault::Validation(diagnostics.clone()), Phase::Validate));
        self.phase = Phase::Rollback;
        remove_dir(&self.paths.staging_dir)?;
        self.store.restore(before)?;
        self.artifacts.write("diagnostics.txt", &render_diagnostics(&diagnostics))?;

        let streak = self.queue.record_rejection(task.id)?;
        let requeue = self.queue.requeue_with_backoff(task.id, self.config.attempt_cap)?;
        self.run_state.last_rejection = Some(Rejection {
            task_id: task.id,
            diagnostics: diagnostics.clone(),
        });

        if let Requeue::Stuck { attempts } = requeue {
            return Ok(Step::Fallback {
                trigger: FallbackTrigger::StuckTask {
                    task_id: task.id,
                    attempts,
                    diagnostics: diagnostics.clone(),
                },
                diagnostics,
                fault,
            });
        }
        if streak >= self.config.fallback_after_rejections {
            return Ok(Step::Fallback {
                trigger: FallbackTrigger::RepeatedRejections {
                    task_id: task.id,
                    streak,
                    diagnostics: diagnostics.clone(),
                },
                diagnostics,
                fault,
            });
        }

        let remediation = self.queue.enqueue(
            &rejection_remediation(task, &diagnostics),
            &now_rfc3339(),
            Some(task.id),
        )?;
        let summary = format!(
            "task {} rolled back: {} diagnostics; filed task {remediation}",
            task.id,
            diagnostics.len()
        );
        self.remember(&summary, task, Outcome::RolledBack)?;
        Ok(Step::Recorded(IterationRecord {
            tasks_touched: vec![task.id, remediation],
            outcome: Outcome::RolledBack,
            fingerprint: Some(Fingerprint::RolledBack),
            diagnostics,
            fault,
            summary,
            ..self.blank_record(before)
        }))
    }

    /// ROLLBACK after the model call budget ran out. No remediation task.
    fn after_transport_failure(
        &mut self,
        task: &Task,
        before: &SnapshotId,
        transport: TransportError,
    ) -> Result<Step, Fault> {
        let fault = Fault::Transport(transport);
        let summary_fault = Some(FaultSummary::new(&fault, Phase::Stage));
        self.phase = Phase::Rollback;
        self.store.restore(before)?;

        if let Requeue::Stuck { attempts } =
            self.queue.requeue_with_backoff(task.id, self.config.attempt_cap)?
        {
            return Ok(Step::Fallback {
                trigger: FallbackTrigger::StuckTask {
                    task_id: task.id,
                    attempts,
                    diagnostics: Vec::new(),
                },
                diagnostics: Vec::new(),
                fault: summary_fault,
            });
        }
        let summary = format!("task {} rolled back: {fault}", task.id);
        self.remember(&summary, task, Outcome::RolledBack)?;
        Ok(Step::Recorded(IterationRecord {
            tasks_touched: vec![task.id],
            outcome: Outcome::RolledBack,
            fingerprint: Some(Fingerprint::RolledBack),
            fault: summary_fault,
            summary,
            ..self.blank_record(before)
        }))
    }

    fn fallback_for_fault(&mut self, fault: Fault) -> Result<IterationRecord> {
        let phase = self.phase;
        error!(phase = %phase, class = fault.class().as_str(), err = %fault, "unhandled fault");
        let summary = FaultSummary::new(&fault, phase);

        // Count the failure against the task so a task that keeps faulting
        // eventually turns stuck instead of looping forever.
        if let Some(task) = &self.task
            && self.queue.get(task.id).is_some_and(|t| t.status == TaskStatus::InProgress)
            && let Err(err) = self.queue.requeue_with_backoff(task.id, self.config.attempt_cap)
        {
            warn!(task = task.id, err = %err, "could not requeue task after fault");
        }

        let diagnostics = match &fault {
            Fault::Validation(diagnostics) => diagnostics.clone(),
            _ => Vec::new(),
        };
        let trigger = FallbackTrigger::Fault {
            phase,
            class: fault.class(),
            message: fault.to_string(),
            task_id: self.task.as_ref().map(|task| task.id),
        };
        self.fallback(trigger, diagnostics, Some(summary))
    }

    fn fallback(
        &mut self,
        trigger: FallbackTrigger,
        diagnostics: Vec<Diagnostic>,
        fault: Option<FaultSummary>,
    ) -> Result<IterationRecord> {
        self.phase = Phase::Fallback;
        if let Err(err) = remove_dir(&self.paths.staging_dir) {
            warn!(err = %err, "could not discard staging area");
        }
        let restore_to = match self.run_state.last_committed.clone() {
            Some(id) => id,
            None => self
                .store
                .latest()?
                .ok_or_else(|| anyhow!("no committed snapshot to restore"))?,
        };
        let snapshot_before = match self.snapshot_before.clone() {
            Some(id) => id,
            None => self.capture_before(&restore_to),
        };
        self.snapshot_before = Some(snapshot_before.clone());

        let request = FallbackRequest {
            iteration_id: self.iteration_id,
            timestamp: self.timestamp.clone(),
            trigger,
            restore_to,
            snapshot_before,
            task: self.task.clone(),
            stuck: self.queue.list_stuck().into_iter().cloned().collect(),
            routes: self.routes.clone(),
            diagnostics,
            fault,
            started: self.started,
        };
        run_fallback(self, request)
    }

    /// Count the interruption against the task a crashed invocation left in
    /// progress. Returns that task's id.
    fn reclaim_interrupted(&mut self) -> Option<TaskId> {
        let reclaimed = match self.queue.reclaim_in_progress(self.config.attempt_cap) {
            Ok(reclaimed) => reclaimed,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "could not requeue the interrupted task");
                return None;
            }
        };
        let (id, requeue) = reclaimed.first().copied()?;
        info!(task = id, ?requeue, "interrupted task requeued");
        self.task = self.queue.get(id).cloned();
        Some(id)
    }

    /// Snapshot the tree as found, for the record. Falls back to the restore
    /// target when even that is impossible.
    fn capture_before(&self, restore_to: &SnapshotId) -> SnapshotId {
        match self.store.create(&self.timestamp) {
            Ok(id) => id,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "could not snapshot the tree before fallback");
                restore_to.clone()
            }
        }
    }

    /// RECORD: apply stagnation tracking, save run state, append the record.
    /// The history append comes last so a failure leaves no partial record.
    fn persist(&mut self, mut record: IterationRecord) -> Result<IterationRecord> {
        self.observe_stagnation(&mut record);
        record.duration_ms = self.started.elapsed().as_millis() as u64;
        write_run_state(&self.paths.run_state_path, &self.run_state)?;
        self.history.append(&record)?;
        Ok(record)
    }

    fn observe_stagnation(&mut self, record: &mut IterationRecord) {
        let Some(fingerprint) = record.fingerprint.clone() else {
            return;
        };
        let policy = self.config.stagnation_policy();
        let Some(escalation) = self.run_state.stagnation.observe(fingerprint, &policy) else {
            return;
        };
        warn!(kind = ?escalation.kind, level = escalation.level, reason = %escalation.reason, "stagnation escalation");
        match escalation.kind {
            EscalationKind::WidenScope => {
                self.run_state.scope_hint = Some(format!(
                    "Recent iterations made no progress ({}). Look beyond the files the task names: re-read the goal and the surrounding code before choosing a change.",
                    escalation.reason
                ));
            }
            EscalationKind::ForceTierUpgrade => self.run_state.force_strong_tier = true,
            EscalationKind::RequestHuman => {
                let body = format!(
                    "Iteration {} escalated after repeated stagnation: {}.\nWidening the scope and upgrading the tier did not help.\nLast outcome: {} ({})",
                    record.iteration_id, escalation.reason, record.outcome, record.summary
                );
                self.human_notice = Some(body);
                record.human_action_needed = true;
            }
        }
        record.escalation = Some(escalation);
    }

    /// Last resort: append a `fatal` record. Errors are logged, not returned.
    fn record_fatal(&self, err: &anyhow::Error) {
        let snapshot_before = self
            .snapshot_before
            .clone()
            .or_else(|| self.run_state.last_committed.clone())
            .unwrap_or_else(|| SnapshotId::from_sequence(0));
        let record = IterationRecord {
            path: PathTaken::Fallback,
            tasks_touched: self.task.iter().map(|task| task.id).collect(),
            outcome: Outcome::Fatal,
            fault: Some(FaultSummary {
                class: FaultClass::Environment,
                phase: self.phase,
                message: format!("{err:#}"),
            }),
            summary: format!("fatal environment failure in {}", self.phase),
            ..self.blank_record(&snapshot_before)
        };
        if let Err(append_err) = self.history.append(&record) {
            error!(err = %format!("{append_err:#}"), "could not record fatal outcome");
        }
    }

    fn remember(&self, summary: &str, task: &Task, outcome: Outcome) -> Result<()> {
        self.memory.append(&MemoryEntry {
            timestamp: now_rfc3339(),
            summary: format!("iteration {}: {summary}", self.iteration_id),
            tags: vec![task.tag(), format!("outcome:{outcome}")],
        })
    }

    fn blank_record(&self, before: &SnapshotId) -> IterationRecord {
        IterationRecord {
            iteration_id: self.iteration_id,
            timestamp: self.timestamp.clone(),
            path: PathTaken::Primary,
            tasks_touched: Vec::new(),
            snapshot_before: before.clone(),
            snapshot_after: None,
            outcome: Outcome::RolledBack,
            routes: self.routes.clone(),
            fingerprint: None,
            diagnostics: Vec::new(),
            fault: None,
            fallback_actions: Vec::new(),
            escalation: None,
            human_action_needed: false,
            summary: String::new(),
            duration_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

impl<M: ModelClient, N: Notifier> RecoveryPort for Iteration<'_, M, N> {
    fn restore(&mut self, snapshot: &SnapshotId) -> Result<()> {
        self.store.restore(snapshot).map(|_| ())
    }

    fn log(&mut self, entry: &MemoryEntry) -> Result<()> {
        self.memory.append(entry)
    }

    fn enqueue(&mut self, description: &str, remediates: Option<TaskId>) -> Result<TaskId> {
        self.queue.enqueue(description, &now_rfc3339(), remediates)
    }

    fn record(&mut self, record: IterationRecord) -> Result<IterationRecord> {
        self.persist(record)
    }
}

const HUMAN_SUBJECT: &str = "warden needs human attention";

/// Iteration id recorded when the history itself cannot be read.
const UNKNOWN_ITERATION: u64 = 0;

/// Fatal record for failures before the run state could be loaded.
fn record_fatal_without_state(
    history: &IterationHistory,
    iteration_id: u64,
    timestamp: &str,
    started: Instant,
    err: &anyhow::Error,
) {
    let record = IterationRecord {
        iteration_id,
        timestamp: timestamp.to_string(),
        path: PathTaken::Primary,
        tasks_touched: Vec::new(),
        snapshot_before: SnapshotId::from_sequence(0),
        snapshot_after: None,
        outcome: Outcome::Fatal,
        routes: Vec::new(),
        fingerprint: None,
        diagnostics: Vec::new(),
        fault: Some(FaultSummary {
            class: FaultClass::Environment,
            phase: Phase::Init,
            message: format!("{err:#}"),
        }),
        fallback_actions: Vec::new(),
        escalation: None,
        human_action_needed: false,
        summary: "fatal environment failure in init".to_string(),
        duration_ms: started.elapsed().as_millis() as u64,
    };
    if let Err(append_err) = history.append(&record) {
        error!(err = %format!("{append_err:#}"), "could not record fatal outcome");
    }
}

fn write_staged(target: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(target, content)
}

fn read_goal(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(goal) => Ok(goal),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(err).with_context(|| format!("read goal {}", path.display())),
    }
}

fn render_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|diagnostic| format!("{diagnostic}\n"))
        .collect()
}
