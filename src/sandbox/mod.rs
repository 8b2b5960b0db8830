// src/sandbox/mod.rs

//! Per-package build sandboxes
//!
//! Every package builds in a fresh copy of the base root, named
//! `archport-<uuid>` and placed next to it under the build root. The base
//! root itself is never modified by a package build. A sandbox moves
//! through these states:
//!
//! ```text
//! Pending -> SandboxProvisioned -> DepsInstalled -> Building -> Succeeded
//!                                                            -> Failed
//! ```
//!
//! Each provisioned sandbox is torn down exactly once, unless the build
//! failed and failed sandboxes are being preserved for inspection. An
//! interrupt tears the active sandbox down regardless.

pub mod host;
pub mod logs;
pub mod stream;

pub use host::{BuildHost, BuildRequest, DevtoolsHost, REQUIRED_TOOLS, check_required_tools};
pub use logs::{BuildLogStore, DEFAULT_LOG_RETENTION};
pub use stream::CommandOutput;

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::plan::CandidatePackage;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prefix of every sandbox directory
pub const SANDBOX_PREFIX: &str = "archport-";

/// Name of the base root under the build root
pub const BASE_ROOT: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::AsRefStr)]
pub enum SandboxState {
    Pending,
    SandboxProvisioned,
    DepsInstalled,
    Building,
    Succeeded,
    Failed,
}

/// A provisioned copy of the base root
#[derive(Debug)]
pub struct Sandbox {
    name: String,
    path: PathBuf,
    state: SandboxState,
}

impl Sandbox {
    /// Directory name under the build root
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> SandboxState {
        self.state
    }
}

/// Executor settings
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Directory holding the base root and the sandboxes
    pub build_root: PathBuf,
    pub cache_dir: PathBuf,
    /// Appended to the package repo to get the upload target
    pub upload_suffix: String,
    pub no_upload: bool,
    /// Keep the sandbox of a failed build
    pub preserve_failed: bool,
    /// Empty the package cache before every build
    pub clear_cache: bool,
    /// Print build output to stdout as it arrives
    pub echo_output: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            build_root: PathBuf::from("/var/tmp/builder"),
            cache_dir: PathBuf::from("/var/tmp/builder/pacman-cache"),
            upload_suffix: "-testing".to_string(),
            no_upload: false,
            preserve_failed: false,
            clear_cache: false,
            echo_output: true,
        }
    }
}

impl ExecutorOptions {
    pub fn base_root(&self) -> PathBuf {
        self.build_root.join(BASE_ROOT)
    }
}

/// Result of one package run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageOutcome {
    pub package: String,
    /// `Succeeded` or `Failed`
    pub state: SandboxState,
    /// Artifacts uploaded
    pub uploaded: usize,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    /// Retained failure log
    pub log_path: Option<PathBuf>,
    /// Sandbox left in place for inspection
    pub preserved: Option<PathBuf>,
}

impl PackageOutcome {
    pub fn succeeded(package: &str, uploaded: usize) -> Self {
        Self {
            package: package.to_string(),
            state: SandboxState::Succeeded,
            uploaded,
            exit_code: Some(0),
            error: None,
            log_path: None,
            preserved: None,
        }
    }

    pub fn failed(package: &str, exit_code: Option<i32>, error: &Error) -> Self {
        Self {
            package: package.to_string(),
            state: SandboxState::Failed,
            uploaded: 0,
            exit_code,
            error: Some(error.to_string()),
            log_path: None,
            preserved: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == SandboxState::Succeeded
    }
}

/// Drives one package at a time through a fresh sandbox
pub struct SandboxExecutor<H: BuildHost> {
    host: H,
    options: ExecutorOptions,
    logs: BuildLogStore,
    cancel: CancellationToken,
}

impl<H: BuildHost> SandboxExecutor<H> {
    pub fn new(
        host: H,
        options: ExecutorOptions,
        logs: BuildLogStore,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            host,
            options,
            logs,
            cancel,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Create the base root if needed
    pub fn prepare(&self) -> Result<()> {
        self.host
            .prepare_base(&self.options.base_root(), &self.options.cache_dir, &self.cancel)
    }

    /// Remove sandboxes left behind by a crashed run
    pub fn cleanup_stale_sandboxes(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.options.build_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(SANDBOX_PREFIX) || !entry.path().is_dir() {
                continue;
            }
            info!("Removing leftover sandbox {}", entry.path().display());
            match self.host.remove_tree(&entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Could not remove {}: {}", entry.path().display(), e),
            }
        }
        Ok(removed)
    }

    /// Copy the base root into a new sandbox
    pub fn provision_sandbox(&self) -> Result<Sandbox> {
        let base = self.options.base_root();
        if !base.is_dir() {
            return Err(Error::NotFound(format!(
                "base root {} (create it before building)",
                base.display()
            )));
        }

        let name = format!("{}{}", SANDBOX_PREFIX, Uuid::new_v4());
        let path = self.options.build_root.join(&name);
        debug!("Provisioning sandbox {}", path.display());

        if let Err(e) = self.host.snapshot(&base, &path, &self.cancel) {
            // A partial copy is not a sandbox yet
            if let Err(cleanup) = self.host.remove_tree(&path) {
                warn!("Failed to remove partial sandbox {}: {}", path.display(), cleanup);
            }
            return Err(e);
        }

        Ok(Sandbox {
            name,
            path,
            state: SandboxState::SandboxProvisioned,
        })
    }

    /// Install the candidate's dependencies into the sandbox
    ///
    /// A failed install is logged and the build goes ahead; the build
    /// itself will report anything that is really missing.
    pub fn install_dependencies(
        &self,
        sandbox: &mut Sandbox,
        candidate: &CandidatePackage,
    ) -> Result<()> {
        let deps = candidate.dependency_names();
        if !deps.is_empty() {
            info!("Installing {} dependencies for {}", deps.len(), candidate.name);
            match self.host.install_packages(&sandbox.path, &deps, &self.cancel) {
                Ok(()) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => warn!(
                    "Dependency install for {} failed, building anyway: {}",
                    candidate.name, e
                ),
            }
        }
        sandbox.state = SandboxState::DepsInstalled;
        Ok(())
    }

    /// Run the build inside the sandbox
    pub fn run_build(
        &self,
        sandbox: &mut Sandbox,
        candidate: &CandidatePackage,
        package_dir: &Path,
    ) -> Result<CommandOutput> {
        sandbox.state = SandboxState::Building;
        let request = BuildRequest {
            package: &candidate.name,
            package_dir,
            chroot_dir: &self.options.build_root,
            copy_name: &sandbox.name,
            cache_dir: &self.options.cache_dir,
        };

        let echo = self.options.echo_output;
        let mut on_line = |line: &str| {
            if echo {
                println!("{}", line);
            } else {
                debug!("{}", line);
            }
        };
        self.host.build(&request, &self.cancel, &mut on_line)
    }

    /// Upload on success, retain a log on failure
    pub fn finalize(
        &self,
        sandbox: &mut Sandbox,
        candidate: &CandidatePackage,
        output: &CommandOutput,
        package_dir: &Path,
        upload_repo: &str,
    ) -> Result<PackageOutcome> {
        let package = candidate.name.as_str();

        let mut outcome = if !output.success() {
            PackageOutcome::failed(
                package,
                Some(output.exit_code),
                &Error::BuildFailed {
                    package: package.to_string(),
                    exit_code: output.exit_code,
                },
            )
        } else if self.options.no_upload {
            info!("Built {} (upload disabled)", package);
            PackageOutcome::succeeded(package, 0)
        } else {
            match self.host.upload(package_dir, upload_repo, &self.cancel) {
                Ok(0) => PackageOutcome::failed(
                    package,
                    Some(0),
                    &Error::UploadFailed {
                        package: package.to_string(),
                        reason: format!("no artifacts found in {}", package_dir.display()),
                    },
                ),
                Ok(count) => {
                    info!("Uploaded {} artifacts for {} to {}", count, package, upload_repo);
                    PackageOutcome::succeeded(package, count)
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => PackageOutcome::failed(
                    package,
                    Some(0),
                    &Error::UploadFailed {
                        package: package.to_string(),
                        reason: e.to_string(),
                    },
                ),
            }
        };

        sandbox.state = outcome.state;
        if !outcome.is_success() {
            let mut text = output.output.clone();
            if let Some(error) = &outcome.error {
                text.push_str(&format!("\n{}\n", error));
            }
            match self.logs.write_failure(package, output.exit_code, &text) {
                Ok(path) => outcome.log_path = Some(path),
                Err(e) => warn!("Failed to write build log for {}: {}", package, e),
            }
        }
        Ok(outcome)
    }

    /// Remove the sandbox; consumes it so it cannot be removed twice
    pub fn teardown_sandbox(&self, sandbox: Sandbox) -> Result<()> {
        debug!(
            "Tearing down sandbox {} ({})",
            sandbox.path.display(),
            sandbox.state
        );
        self.host.remove_tree(&sandbox.path)
    }

    fn teardown_quietly(&self, sandbox: Sandbox) {
        let path = sandbox.path.clone();
        if let Err(e) = self.teardown_sandbox(sandbox) {
            warn!("Failed to tear down sandbox {}: {}", path.display(), e);
        }
    }

    /// Build one package, uploading to `<repo><suffix>`
    pub fn run_package(
        &self,
        candidate: &CandidatePackage,
        package_dir: &Path,
    ) -> Result<PackageOutcome> {
        let repo = candidate.repo.staging_name(&self.options.upload_suffix);
        self.run_package_to(candidate, package_dir, &repo)
    }

    /// Build one package, uploading to `upload_repo`
    ///
    /// Per-package failures come back as a failed outcome. Errors are
    /// reserved for interrupts and problems that affect every package.
    pub fn run_package_to(
        &self,
        candidate: &CandidatePackage,
        package_dir: &Path,
        upload_repo: &str,
    ) -> Result<PackageOutcome> {
        self.cancel.check()?;

        if self.options.clear_cache {
            if let Err(e) = self.host.clear_cache(&self.options.cache_dir) {
                warn!("Failed to clear package cache: {}", e);
            }
        }

        let mut sandbox = match self.provision_sandbox() {
            Ok(sandbox) => sandbox,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Could not provision sandbox for {}: {}", candidate.name, e);
                return Ok(PackageOutcome::failed(&candidate.name, None, &e));
            }
        };
        info!("Building {} in {}", candidate.name, sandbox.path.display());

        let result = self
            .install_dependencies(&mut sandbox, candidate)
            .and_then(|()| self.run_build(&mut sandbox, candidate, package_dir))
            .and_then(|output| {
                self.finalize(&mut sandbox, candidate, &output, package_dir, upload_repo)
            });

        match result {
            Ok(mut outcome) => {
                if !outcome.is_success() && self.options.preserve_failed {
                    info!(
                        "Preserving failed sandbox for {} at {}",
                        candidate.name,
                        sandbox.path.display()
                    );
                    outcome.preserved = Some(sandbox.path.clone());
                } else {
                    self.teardown_quietly(sandbox);
                }
                Ok(outcome)
            }
            Err(Error::Cancelled) => {
                warn!("Build of {} interrupted, removing sandbox", candidate.name);
                self.teardown_quietly(sandbox);
                Err(Error::Cancelled)
            }
            Err(e) if e.is_fatal() => {
                self.teardown_quietly(sandbox);
                Err(e)
            }
            Err(e) => {
                sandbox.state = SandboxState::Failed;
                let mut outcome = PackageOutcome::failed(&candidate.name, None, &e);
                match self.logs.write_failure(&candidate.name, -1, &e.to_string()) {
                    Ok(path) => outcome.log_path = Some(path),
                    Err(log_err) => warn!("Failed to write build log: {}", log_err),
                }
                if self.options.preserve_failed {
                    outcome.preserved = Some(sandbox.path.clone());
                } else {
                    self.teardown_quietly(sandbox);
                }
                Ok(outcome)
            }
        }
    }
}
