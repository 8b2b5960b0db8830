// src/progress.rs

//! Build progress reporting
//!
//! The batch runner and the toolchain bootstrap report every stage and
//! package transition through [`ProgressTracker`]. The CLI logs them with
//! [`LogProgress`]; tests pass [`SilentProgress`] or their own recorder.
//!
//! A run reports `run_started`, then for each package `package_started` and
//! `package_finished`, with `stage_started` whenever the stage changes, and
//! ends with exactly one `run_finished`.

use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

/// Result of one package as seen by progress reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum PackageStatus {
    Built,
    Failed,
}

/// Receives stage and package transitions of a run
pub trait ProgressTracker: Send + Sync {
    /// `total` packages are about to be built
    fn run_started(&self, total: usize);

    /// The following packages belong to `stage`
    fn stage_started(&self, stage: &str);

    fn package_started(&self, name: &str, version: &str);

    fn package_finished(&self, name: &str, status: PackageStatus);

    /// The run ended; `error` is set when it was aborted
    fn run_finished(&self, built: usize, failed: usize, error: Option<&str>);
}

/// Tracker that reports nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl SilentProgress {
    pub fn new() -> Self {
        Self
    }
}

impl ProgressTracker for SilentProgress {
    fn run_started(&self, _total: usize) {}

    fn stage_started(&self, _stage: &str) {}

    fn package_started(&self, _name: &str, _version: &str) {}

    fn package_finished(&self, _name: &str, _status: PackageStatus) {}

    fn run_finished(&self, _built: usize, _failed: usize, _error: Option<&str>) {}
}

/// Logs transitions at info level, e.g. `build [3/40]: zlib 1.3.1-2`
#[derive(Debug)]
pub struct LogProgress {
    name: String,
    position: AtomicUsize,
    total: AtomicUsize,
}

impl LogProgress {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            position: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
        }
    }

    /// Packages started so far
    pub fn position(&self) -> usize {
        self.position.load(Ordering::Relaxed)
    }
}

impl ProgressTracker for LogProgress {
    fn run_started(&self, total: usize) {
        self.position.store(0, Ordering::Relaxed);
        self.total.store(total, Ordering::Relaxed);
        info!("{}: {} packages to build", self.name, total);
    }

    fn stage_started(&self, stage: &str) {
        info!("{}: entering {}", self.name, stage);
    }

    fn package_started(&self, name: &str, version: &str) {
        let position = self.position.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.total.load(Ordering::Relaxed);
        if version.is_empty() {
            info!("{} [{}/{}]: {}", self.name, position, total, name);
        } else {
            info!("{} [{}/{}]: {} {}", self.name, position, total, name, version);
        }
    }

    fn package_finished(&self, name: &str, status: PackageStatus) {
        match status {
            PackageStatus::Built => info!("{}: {} {}", self.name, name, status),
            PackageStatus::Failed => warn!("{}: {} {}", self.name, name, status),
        }
    }

    fn run_finished(&self, built: usize, failed: usize, error: Option<&str>) {
        match error {
            Some(e) => warn!("{}: aborted after {} built: {}", self.name, built, e),
            None if failed > 0 => warn!("{}: {} built, {} failed", self.name, built, failed),
            None => info!("{}: {} built", self.name, built),
        }
    }
}
