//! Side-effecting adapters: filesystem stores, subprocesses, prompts.

pub mod atomic;
pub mod config;
pub mod crash_marker;
pub mod history;
pub mod init;
pub mod iteration_log;
pub mod memory;
pub mod model;
pub mod notify;
pub mod process;
pub mod prompt;
pub mod queue;
pub mod run_state;
pub mod snapshot;
pub mod swap;

/// Current UTC time as RFC 3339 with second precision.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
