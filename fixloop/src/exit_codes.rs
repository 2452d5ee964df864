//! Stable exit codes for fixloop CLI commands.

/// Run succeeded, script executed cleanly, or the check found it safe.
pub const OK: i32 = 0;
/// Invalid arguments or config, unreadable input, or other errors.
pub const INVALID: i32 = 1;
/// Run ended in `failed`, execution failed, or the check found the script unsafe.
pub const FAILED: i32 = 2;
/// The model service could not be reached.
pub const UNAVAILABLE: i32 = 3;
