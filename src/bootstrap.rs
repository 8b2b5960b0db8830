// src/bootstrap.rs

//! Two-stage toolchain bootstrap
//!
//! Stage 1 builds the toolchain packages in a fixed order, several of them
//! more than once, so each pass links against the previous one. Stage 2
//! rebuilds the set with the finished toolchain. Before every package the
//! base root is force-reinstalled with the current toolchain and the
//! package cache is emptied, so each build sees exactly what was uploaded
//! so far.
//!
//! Special-source packages (patched `gcc` and `glibc` trees) are never
//! fetched; they must already be checked out. The bootstrap stops at the
//! first failure and can continue from the last completed step.

use crate::blacklist::package_dir;
use crate::error::{Error, Result};
use crate::index::Repo;
use crate::ledger::{ProgressLedger, ProgressMarker};
use crate::plan::CandidatePackage;
use crate::progress::{PackageStatus, ProgressTracker};
use crate::recipe::Pkgbuild;
use crate::sandbox::{BuildHost, PackageOutcome, SandboxExecutor};
use crate::source::SourceFetcher;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

/// Which pass a step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum BootstrapStage {
    #[strum(serialize = "stage 1")]
    Stage1,
    #[strum(serialize = "stage 2")]
    Stage2,
}

/// Bootstrap package lists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapOptions {
    pub stage1: Vec<String>,
    pub stage2: Vec<String>,
    /// Packages whose sources are maintained by hand
    pub special_sources: Vec<String>,
    /// Packages uploaded to the extra repo instead of core
    pub extra_repo_packages: Vec<String>,
    /// Installed alongside the toolchain before each build
    pub extra_reinstall: Vec<String>,
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            stage1: names(&[
                "linux-api-headers",
                "glibc",
                "binutils",
                "gcc",
                "binutils",
                "gmp",
                "mpfr",
                "libmpc",
                "libisl",
            ]),
            stage2: names(&[
                "glibc", "gcc", "binutils", "gcc", "gmp", "mpfr", "libmpc", "libisl", "libtool",
                "valgrind",
            ]),
            special_sources: names(&["gcc", "glibc"]),
            extra_repo_packages: names(&["valgrind"]),
            extra_reinstall: names(&["gcc-libs"]),
        }
    }
}

impl BootstrapOptions {
    /// The full ordered sequence of build steps
    pub fn sequence(&self) -> Vec<(BootstrapStage, String)> {
        self.stage1
            .iter()
            .map(|n| (BootstrapStage::Stage1, n.clone()))
            .chain(self.stage2.iter().map(|n| (BootstrapStage::Stage2, n.clone())))
            .collect()
    }

    /// Distinct toolchain packages, first-seen order
    pub fn toolchain_set(&self) -> Vec<String> {
        let mut set: Vec<String> = Vec::new();
        for name in self.stage1.iter().chain(&self.stage2).chain(&self.extra_reinstall) {
            if !set.contains(name) {
                set.push(name.clone());
            }
        }
        set
    }

    pub fn is_special(&self, name: &str) -> bool {
        self.special_sources.iter().any(|s| s == name)
    }

    /// Repository a package's artifacts belong to
    pub fn repo_for(&self, name: &str) -> Repo {
        if self.extra_repo_packages.iter().any(|s| s == name) {
            Repo::Extra
        } else {
            Repo::Core
        }
    }
}

/// Outcome of a bootstrap run
#[derive(Debug, Clone, Default)]
pub struct BootstrapReport {
    pub total: usize,
    pub resumed_from: usize,
    /// Step names built in this run
    pub built: Vec<String>,
    /// The step that halted the run
    pub failed: Option<PackageOutcome>,
}

impl BootstrapReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_none()
    }
}

pub struct ToolchainBootstrap<'a, H: BuildHost> {
    executor: &'a SandboxExecutor<H>,
    ledger: ProgressLedger,
    options: BootstrapOptions,
    pkgbuilds_dir: PathBuf,
    progress: &'a dyn ProgressTracker,
}

impl<'a, H: BuildHost> ToolchainBootstrap<'a, H> {
    pub fn new(
        executor: &'a SandboxExecutor<H>,
        ledger: ProgressLedger,
        options: BootstrapOptions,
        pkgbuilds_dir: PathBuf,
        progress: &'a dyn ProgressTracker,
    ) -> Self {
        Self {
            executor,
            ledger,
            options,
            pkgbuilds_dir,
            progress,
        }
    }

    /// Make sure every step has a checkout
    ///
    /// Special sources must already exist. Everything else is fetched at
    /// its latest revision when a fetcher is given.
    pub fn check_sources(&self, fetcher: Option<&dyn SourceFetcher>) -> Result<()> {
        for name in self.options.toolchain_set() {
            if !self.options.stage1.contains(&name) && !self.options.stage2.contains(&name) {
                continue;
            }
            let dir = package_dir(&self.pkgbuilds_dir, &name)?;
            if dir.join("PKGBUILD").is_file() {
                continue;
            }
            if self.options.is_special(&name) {
                return Err(Error::NotFound(format!(
                    "{} not found; check out the {} sources by hand",
                    dir.display(),
                    name
                )));
            }
            match fetcher {
                Some(fetcher) => {
                    let mut candidate = CandidatePackage::bare(&name, "", self.options.repo_for(&name));
                    candidate.force_latest = true;
                    fetcher.fetch(&candidate, &dir)?;
                }
                None => {
                    return Err(Error::NotFound(format!("PKGBUILD for {} in {}", name, dir.display())));
                }
            }
        }
        Ok(())
    }

    fn candidate(&self, name: &str, dir: &std::path::Path) -> CandidatePackage {
        let mut candidate = CandidatePackage::bare(name, "", self.options.repo_for(name));
        match Pkgbuild::load(dir) {
            Ok(pkgbuild) => {
                if let Some(version) = pkgbuild.full_version() {
                    candidate.version = version;
                }
            }
            Err(e) => warn!("Could not read PKGBUILD for {}: {}", name, e),
        }
        candidate
    }

    /// Reinstall the toolchain into the base root and empty the cache
    fn reset_base(&self) -> Result<()> {
        let host = self.executor.host();
        let cancel = self.executor.cancel_token();
        let base = self.executor.options().base_root();

        host.refresh_databases(&base, cancel)
            .map_err(|e| match e {
                Error::Cancelled => Error::Cancelled,
                other => Error::SandboxError(format!("Failed to refresh base root: {}", other)),
            })?;

        match host.install_packages(&base, &self.options.toolchain_set(), cancel) {
            Ok(()) => {}
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            // Early in stage 1 some of the set has not been built yet
            Err(e) => info!("Toolchain reinstall incomplete: {}", e),
        }

        host.clear_cache(&self.executor.options().cache_dir)
            .map_err(|e| Error::SandboxError(format!("Failed to clear package cache: {}", e)))
    }

    /// Run the remaining steps
    pub fn run(&self, resume: bool) -> Result<BootstrapReport> {
        let sequence = self.options.sequence();
        let mut report = BootstrapReport {
            total: sequence.len(),
            ..Default::default()
        };

        // Validate every step before touching the build root
        let mut dirs = Vec::with_capacity(sequence.len());
        for (_, name) in &sequence {
            dirs.push(package_dir(&self.pkgbuilds_dir, name)?);
        }

        if resume {
            let step_names: Vec<&str> = sequence.iter().map(|(_, n)| n.as_str()).collect();
            report.resumed_from = match self.ledger.read()? {
                Some(marker @ ProgressMarker::Index(_)) => marker.resume_offset(&step_names),
                Some(ProgressMarker::Package(name)) => {
                    warn!("Ignoring package marker {} in bootstrap progress", name);
                    0
                }
                None => 0,
            };
            if report.resumed_from > 0 {
                info!(
                    "Continuing from step {}/{}",
                    report.resumed_from + 1,
                    report.total
                );
            }
        }

        self.executor.cleanup_stale_sandboxes()?;
        self.executor.prepare()?;
        self.progress.run_started(report.total - report.resumed_from);

        let result = self.run_steps(&sequence, &dirs, &mut report);
        match &result {
            Ok(()) => {
                let failed = usize::from(report.failed.is_some());
                if failed == 0 {
                    self.ledger.clear()?;
                    info!("Toolchain bootstrap completed");
                }
                self.progress.run_finished(report.built.len(), failed, None);
            }
            Err(e) => {
                self.progress
                    .run_finished(report.built.len(), 0, Some(&e.to_string()));
            }
        }
        result.map(|()| report)
    }

    /// Build steps from the resume point until one fails
    fn run_steps(
        &self,
        sequence: &[(BootstrapStage, String)],
        dirs: &[PathBuf],
        report: &mut BootstrapReport,
    ) -> Result<()> {
        let mut current = None;
        for (i, (stage, name)) in sequence.iter().enumerate().skip(report.resumed_from) {
            self.executor.cancel_token().check()?;
            if current != Some(*stage) {
                current = Some(*stage);
                self.progress.stage_started(&stage.to_string());
            }

            self.reset_base()?;

            let dir = &dirs[i];
            let candidate = self.candidate(name, dir);
            let repo = self
                .options
                .repo_for(name)
                .staging_name(&self.executor.options().upload_suffix);
            self.progress.package_started(name, &candidate.version);
            let outcome = self.executor.run_package_to(&candidate, dir, &repo)?;

            if !outcome.is_success() {
                self.progress.package_finished(name, PackageStatus::Failed);
                warn!(
                    "Bootstrap halted at {} (step {}/{})",
                    name,
                    i + 1,
                    report.total
                );
                report.failed = Some(outcome);
                return Ok(());
            }

            self.progress.package_finished(name, PackageStatus::Built);
            self.ledger.record(&ProgressMarker::Index(i))?;
            report.built.push(name.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sequence() {
        let options = BootstrapOptions::default();
        let sequence: Vec<String> = options.sequence().into_iter().map(|(_, n)| n).collect();
        assert_eq!(
            sequence,
            names(&[
                "linux-api-headers",
                "glibc",
                "binutils",
                "gcc",
                "binutils",
                "gmp",
                "mpfr",
                "libmpc",
                "libisl",
                "glibc",
                "gcc",
                "binutils",
                "gcc",
                "gmp",
                "mpfr",
                "libmpc",
                "libisl",
                "libtool",
                "valgrind",
            ])
        );
        assert_eq!(options.sequence()[9].0, BootstrapStage::Stage2);
    }

    #[test]
    fn test_toolchain_set_is_distinct() {
        let set = BootstrapOptions::default().toolchain_set();
        assert_eq!(set.len(), 11);
        assert_eq!(set.last().map(String::as_str), Some("gcc-libs"));
        assert_eq!(set.iter().filter(|n| *n == "gcc").count(), 1);
    }

    #[test]
    fn test_repo_for() {
        let options = BootstrapOptions::default();
        assert_eq!(options.repo_for("valgrind"), Repo::Extra);
        assert_eq!(options.repo_for("glibc"), Repo::Core);
        assert_eq!(options.repo_for("valgrind").staging_name("-testing"), "extra-testing");
    }
}
