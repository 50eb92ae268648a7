//! Fatal error kinds that end a run immediately.
//!
//! Everything else travels as a plain `anyhow::Error`. These two are recovered
//! with `downcast_ref` so the controller can tell "stop now" apart from a
//! retryable failure.

use thiserror::Error;

/// The invocation environment cannot host a run (e.g. not a git repository).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("environment error: {message}")]
pub struct EnvironmentError {
    pub message: String,
}

impl EnvironmentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A required external tool could not be launched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("tool unavailable: {tool} ({reason})")]
pub struct ToolUnavailableError {
    pub tool: String,
    pub reason: String,
}

/// True when `err` (or anything it wraps) must stop the run without retrying.
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause.downcast_ref::<EnvironmentError>().is_some()
            || cause.downcast_ref::<ToolUnavailableError>().is_some()
    })
}
