//! Stable exit codes for warden CLI commands.

/// The iteration reached a handled outcome (`committed`, `rolled_back`,
/// `fallback_recovered`), or a subcommand succeeded.
pub const OK: i32 = 0;
/// Environment failure that even the Fallback Agent could not handle.
pub const FATAL: i32 = 1;
/// A subcommand was refused: invalid config, uninitialized or already
/// initialized root, bad arguments.
pub const INVALID: i32 = 2;
