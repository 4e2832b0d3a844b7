//! Fault taxonomy for a single iteration.
//!
//! - `Validation`: the patch gate rejected a batch (recovered by rollback + requeue).
//! - `Transport`: a model call failed or timed out (recovered by retry or tier downgrade).
//! - `Environment`: filesystem, permission or resource failure. The only class that may
//!   propagate out of `run_one_iteration`, and only when the Fallback Agent cannot run.
//! - `Logic`: an internal invariant was violated. Always routed to the Fallback Agent.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::{Diagnostic, Phase, Tier};

/// A model-completion call failed, timed out, or returned nothing usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{tier} tier: {reason}")]
pub struct TransportError {
    pub tier: Tier,
    pub reason: String,
    pub timed_out: bool,
}

impl TransportError {
    pub fn failed(tier: Tier, reason: impl Into<String>) -> Self {
        Self {
            tier,
            reason: reason.into(),
            timed_out: false,
        }
    }

    pub fn timeout(tier: Tier, after: Duration) -> Self {
        Self {
            tier,
            reason: format!("timed out after {}s", after.as_secs()),
            timed_out: true,
        }
    }
}

/// Raised by I/O adapters when persisted state contradicts an invariant
/// (duplicate snapshot id, unknown task id, ...). Carried inside `anyhow` and
/// recovered as [`Fault::Logic`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct InvariantViolation(pub String);

/// Failure that makes even the Fallback Agent unsafe to run.
#[derive(Debug, Error)]
#[error("environment failure: {0:#}")]
pub struct EnvironmentError(pub anyhow::Error);

impl From<anyhow::Error> for EnvironmentError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

#[derive(Debug, Error)]
pub enum Fault {
    #[error("patch rejected: {}", summarize(.0))]
    Validation(Vec<Diagnostic>),
    #[error("transport failure: {0}")]
    Transport(TransportError),
    #[error("environment failure: {0:#}")]
    Environment(anyhow::Error),
    #[error("invariant violated: {0}")]
    Logic(String),
}

impl Fault {
    pub fn logic(message: impl Into<String>) -> Self {
        Fault::Logic(message.into())
    }

    pub fn class(&self) -> FaultClass {
        match self {
            Fault::Validation(_) => FaultClass::Validation,
            Fault::Transport(_) => FaultClass::Transport,
            Fault::Environment(_) => FaultClass::Environment,
            Fault::Logic(_) => FaultClass::Logic,
        }
    }
}

impl From<TransportError> for Fault {
    fn from(err: TransportError) -> Self {
        Fault::Transport(err)
    }
}

impl From<anyhow::Error> for Fault {
    fn from(err: anyhow::Error) -> Self {
        if let Some(violation) = err.downcast_ref::<InvariantViolation>() {
            return Fault::Logic(violation.0.clone());
        }
        if let Some(transport) = err.downcast_ref::<TransportError>() {
            return Fault::Transport(transport.clone());
        }
        Fault::Environment(err)
    }
}

/// Serializable class tag for a [`Fault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultClass {
    Validation,
    Transport,
    Environment,
    Logic,
}

impl FaultClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultClass::Validation => "validation",
            FaultClass::Transport => "transport",
            FaultClass::Environment => "environment",
            FaultClass::Logic => "logic",
        }
    }
}

/// Fault details as persisted in the iteration record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultSummary {
    pub class: FaultClass,
    pub phase: Phase,
    pub message: String,
}

impl FaultSummary {
    pub fn new(fault: &Fault, phase: Phase) -> Self {
        Self {
            class: fault.class(),
            phase,
            message: fault.to_string(),
        }
    }
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    match diagnostics {
        [] => "no diagnostics".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{first} (+{} more)", rest.len()),
    }
}
