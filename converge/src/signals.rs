//! Cooperative cancellation.
//!
//! Ctrl-C only sets a flag. The controller checks it between phases, so a
//! blocking agent or test run finishes (or times out) before the run stops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Shared cancellation flag, cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Listen for Ctrl-C on a background thread and cancel on the first one.
    pub fn install_ctrl_c(&self) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("build signal runtime")?;
        let flag = self.clone();
        thread::Builder::new()
            .name("converge-signals".to_string())
            .spawn(move || {
                runtime.block_on(async {
                    match tokio::signal::ctrl_c().await {
                        Ok(()) => {
                            warn!("interrupt received; stopping after the current phase");
                            flag.cancel();
                        }
                        Err(err) => warn!(err = %err, "ctrl-c listener failed"),
                    }
                });
            })
            .context("spawn signal thread")?;
        debug!("ctrl-c handler installed");
        Ok(())
    }
}
