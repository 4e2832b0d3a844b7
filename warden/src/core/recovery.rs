//! Why the Fallback Agent was entered, and the one remediation task it files.

use serde::{Deserialize, Serialize};

use crate::core::fault::FaultClass;
use crate::core::types::{Diagnostic, Phase, Task, TaskId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackTrigger {
    /// An unhandled fault escaped a primary phase.
    Fault {
        phase: Phase,
        class: FaultClass,
        message: String,
        task_id: Option<TaskId>,
    },
    /// The same task was rejected by the validator too many times in a row.
    RepeatedRejections {
        task_id: TaskId,
        streak: u32,
        diagnostics: Vec<Diagnostic>,
    },
    /// A task exceeded its attempt cap and was archived as stuck.
    StuckTask {
        task_id: TaskId,
        attempts: u32,
        diagnostics: Vec<Diagnostic>,
    },
    /// The previous invocation never reached RECORD.
    CrashMarker {
        interrupted_iteration: u64,
        /// Task that was in progress when it stopped.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<TaskId>,
    },
}

impl FallbackTrigger {
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            FallbackTrigger::Fault { task_id, .. }
            | FallbackTrigger::CrashMarker { task_id, .. } => *task_id,
            FallbackTrigger::RepeatedRejections { task_id, .. }
            | FallbackTrigger::StuckTask { task_id, .. } => Some(*task_id),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            FallbackTrigger::Fault { .. } => "trigger:fault",
            FallbackTrigger::RepeatedRejections { .. } => "trigger:rejections",
            FallbackTrigger::StuckTask { .. } => "trigger:stuck",
            FallbackTrigger::CrashMarker { .. } => "trigger:crash",
        }
    }

    /// One-line description for memory and the status summary.
    pub fn describe(&self) -> String {
        match self {
            FallbackTrigger::Fault {
                phase,
                class,
                message,
                ..
            } => format!("{} fault in {phase}: {message}", class.as_str()),
            FallbackTrigger::RepeatedRejections {
                task_id, streak, ..
            } => format!("task {task_id} rejected by validation {streak} times in a row"),
            FallbackTrigger::StuckTask { task_id, attempts, .. } => {
                format!("task {task_id} stuck after {attempts} attempts")
            }
            FallbackTrigger::CrashMarker {
                interrupted_iteration,
                task_id: None,
            } => format!("iteration {interrupted_iteration} did not finish (crash marker found)"),
            FallbackTrigger::CrashMarker {
                interrupted_iteration,
                task_id: Some(task_id),
            } => format!(
                "iteration {interrupted_iteration} did not finish while on task {task_id} (crash marker found)"
            ),
        }
    }

    /// Description of the single remediation task the Fallback Agent enqueues.
    pub fn remediation(&self, task: Option<&Task>) -> String {
        let subject = task.map_or_else(String::new, |t| format!(" while working on \"{}\"", t.description));
        match self {
            FallbackTrigger::Fault { phase, message, .. } => format!(
                "Investigate the failure in the {phase} phase{subject} and make the smallest change that avoids it. Error: {message}"
            ),
            FallbackTrigger::RepeatedRejections { diagnostics, .. }
            | FallbackTrigger::StuckTask { diagnostics, .. } => {
                let mut text = format!(
                    "Fix the problems that kept blocking progress{subject}. Break the work into a smaller step."
                );
                append_diagnostics(&mut text, diagnostics);
                text
            }
            FallbackTrigger::CrashMarker {
                interrupted_iteration,
                ..
            } => format!(
                "Iteration {interrupted_iteration} was interrupted before it finished{subject}. Check that the working tree is consistent and redo any lost work in a smaller step."
            ),
        }
    }
}

fn append_diagnostics(text: &mut String, diagnostics: &[Diagnostic]) {
    if diagnostics.is_empty() {
        return;
    }
    text.push_str(" Last diagnostics:");
    for diagnostic in diagnostics.iter().take(8) {
        text.push_str(&format!(" [{diagnostic}]"));
    }
    if diagnostics.len() > 8 {
        text.push_str(&format!(" (+{} more)", diagnostics.len() - 8));
    }
}

/// Description of the remediation task filed after a plain validation rejection.
pub fn rejection_remediation(task: &Task, diagnostics: &[Diagnostic]) -> String {
    let mut text = format!(
        "Repair the rejected change for task {} (\"{}\").",
        task.id, task.description
    );
    append_diagnostics(&mut text, diagnostics);
    text
}
