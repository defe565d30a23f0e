//! Stable exit codes for explorer CLI commands.

/// Command succeeded; for `explore`, the session was committed.
pub const OK: i32 = 0;
/// Invalid arguments, config or device state; nothing was sent to the service.
pub const INVALID: i32 = 1;
/// The session was cancelled (Ctrl-C or declined at a prompt).
pub const CANCELLED: i32 = 2;
/// The session ended in `failed`.
pub const FAILED: i32 = 3;
