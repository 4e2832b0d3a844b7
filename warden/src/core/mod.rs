//! Deterministic, pure logic shared by the warden.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod fault;
pub mod patch;
pub mod plan;
pub mod record;
pub mod recovery;
pub mod references;
pub mod router;
pub mod selector;
pub mod stagnation;
pub mod syntax;
pub mod tracking;
pub mod types;
pub mod validator;
