//! Stable exit codes for the `converge` CLI.

use crate::core::state::Terminal;

/// The task converged and was integrated.
pub const OK: i32 = 0;
/// Exhaustion, merge failure, or an environment/tool error.
pub const FAILED: i32 = 1;
/// Stopped by an interrupt (128 + SIGINT).
pub const ABANDONED: i32 = 130;

pub fn for_outcome(outcome: Terminal) -> i32 {
    match outcome {
        Terminal::Success => OK,
        Terminal::Exhausted | Terminal::MergeFailed => FAILED,
        Terminal::Abandoned => ABANDONED,
    }
}
