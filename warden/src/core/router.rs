//! Model Router: picks a tier per task from its description, its attempt
//! history and the recent health of the strong tier.
//!
//! The router never calls a model. Reachability problems surface as
//! `TransportError`s at the call site and feed back in through memory.

use crate::core::types::{MemoryEntry, RouteDecision, Task, Tier};

/// Memory tag marking a failed model call.
pub const TRANSPORT_TAG: &str = "transport";
/// Memory tag marking a successful model call.
pub const MODEL_OK_TAG: &str = "model:ok";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterPolicy {
    pub long_description_chars: usize,
    pub strong_keywords: Vec<String>,
    pub escalate_after_attempts: u32,
    pub degrade_after_failures: u32,
}

/// Strong-tier health as observed in memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierSignal {
    /// Strong-tier transport failures for this task since its last strong success.
    pub strong_consecutive_failures: u32,
}

impl TierSignal {
    /// Derive the signal from memory entries in chronological order.
    pub fn from_memory<'a>(task: &Task, entries: impl IntoIterator<Item = &'a MemoryEntry>) -> Self {
        let task_tag = task.tag();
        let strong_tag = Tier::Strong.tag();
        let mut failures = 0;
        for entry in entries {
            if !entry.has_tag(&task_tag) || !entry.has_tag(&strong_tag) {
                continue;
            }
            if entry.has_tag(TRANSPORT_TAG) {
                failures += 1;
            } else if entry.has_tag(MODEL_OK_TAG) {
                failures = 0;
            }
        }
        Self {
            strong_consecutive_failures: failures,
        }
    }
}

pub fn route(task: &Task, signal: &TierSignal, force_strong: bool, policy: &RouterPolicy) -> RouteDecision {
    let wants_strong = strong_reason(task, force_strong, policy);
    let (tier, degraded, reason) = match wants_strong {
        None => (Tier::Fast, false, "routine task".to_string()),
        Some(why) if signal.strong_consecutive_failures >= policy.degrade_after_failures => (
            Tier::Fast,
            true,
            format!(
                "{why}; strong tier failed {} times in a row",
                signal.strong_consecutive_failures
            ),
        ),
        Some(why) => (Tier::Strong, false, why),
    };
    RouteDecision {
        task_id: task.id,
        tier,
        degraded,
        reason,
    }
}

fn strong_reason(task: &Task, force_strong: bool, policy: &RouterPolicy) -> Option<String> {
    if force_strong {
        return Some("tier upgrade forced by stagnation".to_string());
    }
    if task.attempts >= policy.escalate_after_attempts {
        return Some(format!("{} prior attempts", task.attempts));
    }
    if task.description.chars().count() > policy.long_description_chars {
        return Some("long description".to_string());
    }
    let lowered = task.description.to_lowercase();
    policy
        .strong_keywords
        .iter()
        .find(|keyword| lowered.contains(&keyword.to_lowercase()))
        .map(|keyword| format!("keyword `{keyword}`"))
}
