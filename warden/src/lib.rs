//! Resilient self-modifying agent loop.
//!
//! Each invocation runs exactly one iteration: pick a task, ask a model for a
//! patch, stage it next to the live tree, validate it, then swap it in or roll
//! back. Whatever happens, one iteration record is appended. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (validation, routing, stagnation,
//!   task selection). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (snapshots, stores, model and
//!   process execution, prompts). Isolated behind small traits so tests can
//!   substitute fakes.
//!
//! [`orchestrator`] composes the two into `run_one_iteration`; [`fallback`]
//! holds the capability-restricted recovery path it diverts to.

pub mod core;
pub mod exit_codes;
pub mod fallback;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
