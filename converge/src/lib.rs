//! Drive a coding agent until a repository's tests pass, then merge the work.
//!
//! Each task gets an isolated git worktree on its own `converge/*` branch.
//! The controller loops build context, invoke agent, and validate until the
//! gate opens or the cycle budget runs out, then integrates the branch into
//! the mainline, handing conflicts and regressions back to the agent.
//!
//! - **[`core`]**: Pure logic (state machine, output parsing, sampling).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (git, subprocesses, files),
//!   behind traits where the controller needs to swap them in tests.
//!
//! [`controller`] and [`resolve`] tie the two together; [`run`] implements
//! the CLI commands.

pub mod controller;
pub mod core;
pub mod errors;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod resolve;
pub mod run;
pub mod signals;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
