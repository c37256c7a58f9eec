//! Process exit codes of the `ralph` binary.

/// Run completed (backlog done or budget reached).
pub const SUCCESS: i32 = 0;
/// Fatal error, lock conflict, or initialization failure.
pub const FAILURE: i32 = 1;
/// Gracefully interrupted by the operator.
pub const INTERRUPTED: i32 = 130;
/// Force-quit on a double interrupt.
pub const FORCE_QUIT: i32 = 137;
