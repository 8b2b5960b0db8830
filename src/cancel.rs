// src/cancel.rs

//! Cooperative cancellation
//!
//! SIGINT and SIGTERM flip a shared token instead of exiting the process.
//! The executor polls the token while a build runs, kills the child, tears
//! down the active sandbox and unwinds normally, so drop guards such as the
//! build lock still run.

use crate::error::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Err(Cancelled)` once the token has fired
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Route SIGINT/SIGTERM to `token`
///
/// Can only be installed once per process.
pub fn install_signal_handler(token: &CancellationToken) -> Result<()> {
    let token = token.clone();
    ctrlc::set_handler(move || {
        if !token.is_cancelled() {
            warn!("Interrupt received, stopping after cleanup");
        }
        token.cancel();
    })
    .map_err(|e| Error::CommandFailed(format!("Failed to install signal handler: {}", e)))
}
