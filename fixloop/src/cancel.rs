//! Cooperative cancellation shared between the caller, the loop and the sandbox.

use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::warn;

/// Exit status used when a second interrupt forces the process down.
pub const INTERRUPTED_EXIT: i32 = 130;

/// Cloneable flag; every clone observes the same cancellation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Route Ctrl-C into this token.
    ///
    /// The first interrupt cancels; the loop and any running child wind down
    /// on their own. A second one exits immediately with
    /// [`INTERRUPTED_EXIT`]. Only one handler can be installed per process.
    pub fn cancel_on_interrupt(&self) -> Result<()> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            if token.is_cancelled() {
                process::exit(INTERRUPTED_EXIT);
            }
            warn!("interrupt received, cancelling run");
            token.cancel();
        })
        .context("install interrupt handler")
    }
}
