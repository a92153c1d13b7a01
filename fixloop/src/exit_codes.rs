//! Stable exit codes for fixloop CLI commands.

use crate::core::state::RepairState;
use crate::core::types::RunStatus;

/// Command succeeded, or every run passed.
pub const OK: i32 = 0;
/// Invalid input/config, or a run crashed.
pub const INVALID: i32 = 1;
/// A run exhausted its iteration budget with errors remaining.
pub const FAILED: i32 = 2;
/// `fixloop status` found no run with the given id.
pub const NOT_FOUND: i32 = 3;

/// Exit code summarizing a batch of finished runs; crashes outrank budget failures.
pub fn for_runs(states: &[RepairState]) -> i32 {
    if states.iter().any(|state| state.error.is_some()) {
        INVALID
    } else if states.iter().any(|state| state.status == RunStatus::Failed) {
        FAILED
    } else {
        OK
    }
}
