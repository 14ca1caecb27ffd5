//! Stable exit codes for the `taskloop` CLI.

use crate::core::types::LoopState;

/// Every task completed.
pub const OK: i32 = 0;
/// Invalid configuration, backend failure during bootstrap, or other errors.
pub const INVALID: i32 = 1;
/// The loop budget ran out before the queue drained.
pub const LOOP_LIMIT: i32 = 2;
/// The run was stopped manually.
pub const STOPPED: i32 = 3;

/// Exit code for the state a run ended in.
pub fn for_state(state: LoopState) -> i32 {
    match state {
        LoopState::Completed => OK,
        LoopState::LoopLimitReached => LOOP_LIMIT,
        LoopState::Stopped => STOPPED,
        LoopState::Idle | LoopState::Running | LoopState::Paused | LoopState::Failed { .. } => {
            INVALID
        }
    }
}
