//! Tracing setup for the CLI.
//!
//! Log lines go to stderr and are filtered by `RUST_LOG`. Workspace
//! artifacts (`.converge/cycles/`, `context.md`, `history.log`) are written
//! regardless of the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. Defaults to `info` when `RUST_LOG` is unset.
///
/// ```bash
/// RUST_LOG=converge=debug converge run "fix the flaky parser test"
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
