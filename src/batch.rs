// src/batch.rs

//! Batch execution of a build plan
//!
//! Packages are built strictly one after another in plan order. Skipped and
//! blacklisted entries are dropped first, then every remaining name is
//! validated before any sandbox is created. After each success the ledger
//! records the package so an interrupted batch can continue where it
//! stopped; failures are collected into the retry file.

use crate::blacklist::{Blacklist, package_dir};
use crate::error::{Error, Result};
use crate::ledger::{ProgressLedger, ProgressMarker};
use crate::plan::{BuildPlan, CandidatePackage};
use crate::progress::{PackageStatus, ProgressTracker};
use crate::sandbox::{BuildHost, PackageOutcome, SandboxExecutor};
use std::path::PathBuf;
use tracing::{info, warn};

/// Settings for one batch
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Directory holding one checkout per basename
    pub pkgbuilds_dir: PathBuf,
    pub blacklist: Blacklist,
    /// Continue after the last recorded success
    pub resume: bool,
    pub stop_on_failure: bool,
    /// Where failed packages are written
    pub retry_path: PathBuf,
}

/// A validated package ready to build
#[derive(Debug, Clone)]
pub struct QueuedPackage {
    pub candidate: CandidatePackage,
    pub dir: PathBuf,
}

/// What a batch will do, computed before anything runs
#[derive(Debug, Clone, Default)]
pub struct BatchQueue {
    pub packages: Vec<QueuedPackage>,
    /// Names dropped as skipped or blacklisted
    pub filtered: Vec<String>,
    /// Index of the first package to build
    pub start: usize,
}

impl BatchQueue {
    pub fn pending(&self) -> &[QueuedPackage] {
        &self.packages[self.start..]
    }
}

/// Outcome of a batch
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<PackageOutcome>,
    pub filtered: Vec<String>,
    /// Packages skipped because an earlier run already built them
    pub resumed_from: usize,
    /// True if `stop_on_failure` ended the batch early
    pub stopped_early: bool,
    pub retry_file: Option<PathBuf>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.stopped_early
    }
}

pub struct BatchRunner<'a, H: BuildHost> {
    executor: &'a SandboxExecutor<H>,
    ledger: ProgressLedger,
    options: BatchOptions,
    progress: &'a dyn ProgressTracker,
}

impl<'a, H: BuildHost> BatchRunner<'a, H> {
    pub fn new(
        executor: &'a SandboxExecutor<H>,
        ledger: ProgressLedger,
        options: BatchOptions,
        progress: &'a dyn ProgressTracker,
    ) -> Self {
        Self {
            executor,
            ledger,
            options,
            progress,
        }
    }

    /// Filter, validate and position the plan without building anything
    pub fn queue(&self, plan: &BuildPlan) -> Result<BatchQueue> {
        let mut queue = BatchQueue::default();

        for candidate in &plan.packages {
            if candidate.skip {
                info!(
                    "Skipping {}: {}",
                    candidate.name,
                    candidate.skip_reason.as_deref().unwrap_or("marked skip")
                );
                queue.filtered.push(candidate.name.clone());
                continue;
            }
            let names = std::iter::once(candidate.name.as_str())
                .chain(candidate.packages.iter().map(String::as_str));
            if let Some(hit) = self.options.blacklist.match_group(&candidate.basename, names) {
                info!(
                    "Skipping {}: {} matches blacklist pattern '{}'",
                    candidate.name, hit.name, hit.pattern
                );
                queue.filtered.push(candidate.name.clone());
                continue;
            }

            let dir = package_dir(&self.options.pkgbuilds_dir, &candidate.basename)?;
            queue.packages.push(QueuedPackage {
                candidate: candidate.clone(),
                dir,
            });
        }

        if self.options.resume {
            let names: Vec<&str> = queue
                .packages
                .iter()
                .map(|p| p.candidate.name.as_str())
                .collect();
            queue.start = self.ledger.resume_offset(&names)?;
            if queue.start > 0 {
                info!(
                    "Continuing after {} already built packages",
                    queue.start
                );
            }
        }

        Ok(queue)
    }

    /// Build every queued package
    pub fn run(&self, plan: &BuildPlan) -> Result<BatchReport> {
        let queue = self.queue(plan)?;
        let mut report = BatchReport {
            filtered: queue.filtered.clone(),
            resumed_from: queue.start,
            ..Default::default()
        };

        let pending = queue.pending();
        if pending.is_empty() {
            info!("Nothing to build");
            // A resumed run that finds everything built is complete
            self.ledger.clear()?;
            self.progress.run_finished(0, 0, None);
            return Ok(report);
        }

        let stale = self.executor.cleanup_stale_sandboxes()?;
        if stale > 0 {
            info!("Removed {} leftover sandboxes", stale);
        }
        self.executor.prepare()?;

        self.progress.run_started(pending.len());
        let result = self.build_all(pending, &mut report);

        if !report.failed.is_empty() {
            let failed: Vec<CandidatePackage> = report
                .failed
                .iter()
                .filter_map(|outcome| {
                    pending
                        .iter()
                        .find(|p| p.candidate.name == outcome.package)
                        .map(|p| p.candidate.clone())
                })
                .collect();
            plan.retry(failed).save(&self.options.retry_path)?;
            report.retry_file = Some(self.options.retry_path.clone());
        }

        let (built, failed) = (report.succeeded.len(), report.failed.len());
        match result {
            Ok(()) => {
                if report.is_success() {
                    self.ledger.clear()?;
                }
                self.progress.run_finished(built, failed, None);
                Ok(report)
            }
            Err(e) => {
                self.progress.run_finished(built, failed, Some(&e.to_string()));
                Err(e)
            }
        }
    }

    fn build_all(&self, pending: &[QueuedPackage], report: &mut BatchReport) -> Result<()> {
        let mut stage = None;
        for queued in pending {
            let candidate = &queued.candidate;
            self.executor.cancel_token().check()?;
            if stage != Some(candidate.build_stage) {
                stage = Some(candidate.build_stage);
                self.progress
                    .stage_started(&format!("stage {}", candidate.build_stage));
            }
            self.progress
                .package_started(&candidate.name, &candidate.version);

            let outcome = if queued.dir.join("PKGBUILD").is_file() {
                self.executor.run_package(candidate, &queued.dir)?
            } else {
                let err = Error::NotFound(format!("PKGBUILD in {}", queued.dir.display()));
                warn!("Cannot build {}: {}", candidate.name, err);
                PackageOutcome::failed(&candidate.name, None, &err)
            };
            self.progress.package_finished(
                &candidate.name,
                if outcome.is_success() {
                    PackageStatus::Built
                } else {
                    PackageStatus::Failed
                },
            );

            if outcome.is_success() {
                self.ledger
                    .record(&ProgressMarker::Package(candidate.name.clone()))?;
                report.succeeded.push(candidate.name.clone());
            } else {
                warn!(
                    "{} failed: {}",
                    candidate.name,
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
                report.failed.push(outcome);
                if self.options.stop_on_failure {
                    warn!("Stopping after first failure");
                    report.stopped_early = true;
                    break;
                }
            }
        }
        Ok(())
    }
}
