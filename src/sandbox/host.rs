// src/sandbox/host.rs

//! Host operations behind the executor
//!
//! [`BuildHost`] is everything the executor needs from the machine: a base
//! root, throwaway copies of it, package installs inside a copy, the build
//! itself, artifact upload and tree removal. [`DevtoolsHost`] implements it
//! with the Arch devtools (`mkarchroot`, `arch-nspawn`, `makechrootpkg`)
//! plus `rsync` and `repo-upload`.

use super::stream::{CommandOutput, run_quiet, run_streaming};
use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Tools that must be on PATH before any build starts
pub const REQUIRED_TOOLS: [&str; 5] = [
    "makechrootpkg",
    "pkgctl",
    "repo-upload",
    "arch-nspawn",
    "rsync",
];

/// One build inside a provisioned copy
#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
    pub package: &'a str,
    /// Directory holding the PKGBUILD; the build runs here
    pub package_dir: &'a Path,
    /// Directory holding the base `root` and the copies
    pub chroot_dir: &'a Path,
    /// Name of the copy under `chroot_dir`
    pub copy_name: &'a str,
    pub cache_dir: &'a Path,
}

pub trait BuildHost {
    /// Create the base root if it does not exist yet
    fn prepare_base(&self, base_root: &Path, cache_dir: &Path, cancel: &CancellationToken)
    -> Result<()>;

    /// Refresh the package databases inside `root`
    fn refresh_databases(&self, root: &Path, cancel: &CancellationToken) -> Result<()>;

    /// Copy `base_root` to `dest`
    fn snapshot(&self, base_root: &Path, dest: &Path, cancel: &CancellationToken) -> Result<()>;

    /// Install (or reinstall) `packages` inside `root`
    fn install_packages(
        &self,
        root: &Path,
        packages: &[String],
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Run the build, passing output lines to `on_line`
    fn build(
        &self,
        request: &BuildRequest<'_>,
        cancel: &CancellationToken,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<CommandOutput>;

    /// Upload built artifacts from `package_dir`, returning how many
    fn upload(&self, package_dir: &Path, repo: &str, cancel: &CancellationToken) -> Result<usize>;

    /// Remove a directory tree without crossing filesystem boundaries
    fn remove_tree(&self, path: &Path) -> Result<()>;

    /// Empty the package cache
    fn clear_cache(&self, cache_dir: &Path) -> Result<()>;
}

/// Check every tool in `tools` resolves on PATH
pub fn check_required_tools(tools: &[&str]) -> Result<()> {
    for tool in tools {
        match which::which(tool) {
            Ok(path) => debug!("Found {} at {}", tool, path.display()),
            Err(_) => return Err(Error::ToolNotFound((*tool).to_string())),
        }
    }
    Ok(())
}

/// Built package archives in `dir`, signatures excluded
pub fn find_artifacts(dir: &Path) -> Vec<PathBuf> {
    let mut artifacts: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            name.contains(".pkg.tar.") && !name.ends_with(".sig")
        })
        .map(|entry| entry.into_path())
        .collect();
    artifacts.sort();
    artifacts
}

/// Host backed by the Arch devtools
#[derive(Debug, Clone)]
pub struct DevtoolsHost {
    /// Prefix privileged commands with `sudo`
    pub use_sudo: bool,
    pub pacman_conf: PathBuf,
    pub makepkg_conf: PathBuf,
    /// Architecture passed to `repo-upload`
    pub arch: String,
    pub upload_bucket: Option<String>,
}

impl Default for DevtoolsHost {
    fn default() -> Self {
        Self {
            use_sudo: true,
            pacman_conf: PathBuf::from("chroot-config/pacman.conf"),
            makepkg_conf: PathBuf::from("chroot-config/makepkg.conf"),
            arch: "aarch64".to_string(),
            upload_bucket: None,
        }
    }
}

impl DevtoolsHost {
    fn command(&self, program: &str) -> Command {
        if self.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg(program);
            cmd
        } else {
            Command::new(program)
        }
    }

    fn run_checked(&self, cmd: Command, cancel: &CancellationToken) -> Result<CommandOutput> {
        let rendered = format!("{:?}", cmd);
        debug!("Running: {}", rendered);
        let out = run_quiet(cmd, cancel)?;
        if out.success() {
            Ok(out)
        } else {
            Err(Error::CommandFailed(format!(
                "{} exited with {}",
                rendered, out.exit_code
            )))
        }
    }

    pub fn mkarchroot_command(&self, base_root: &Path, cache_dir: &Path) -> Command {
        let mut cmd = self.command("mkarchroot");
        cmd.arg("-C")
            .arg(&self.pacman_conf)
            .arg("-M")
            .arg(&self.makepkg_conf)
            .arg("-c")
            .arg(cache_dir)
            .arg(base_root)
            .arg("base-devel");
        cmd
    }

    pub fn snapshot_command(&self, base_root: &Path, dest: &Path) -> Command {
        // Trailing slash copies the contents, not the directory
        let mut source = base_root.as_os_str().to_owned();
        source.push("/");
        let mut cmd = self.command("rsync");
        cmd.args(["-a", "--delete", "-q", "-W", "-x"])
            .arg(source)
            .arg(dest);
        cmd
    }

    pub fn pacman_command(&self, root: &Path, args: &[&str], packages: &[String]) -> Command {
        let mut cmd = self.command("arch-nspawn");
        cmd.arg(root).arg("pacman").args(args).args(packages);
        cmd
    }

    pub fn build_command(&self, request: &BuildRequest<'_>) -> Command {
        let mut cmd = if self.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg("--preserve-env=SOURCE_DATE_EPOCH").arg("makechrootpkg");
            cmd
        } else {
            Command::new("makechrootpkg")
        };
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        cmd.arg("-l")
            .arg(request.copy_name)
            .arg("-r")
            .arg(request.chroot_dir)
            .arg("-d")
            .arg(request.cache_dir)
            .args(["--", "--ignorearch"])
            .current_dir(request.package_dir)
            .env("SOURCE_DATE_EPOCH", epoch.to_string());
        cmd
    }

    pub fn upload_command(&self, artifact: &Path, repo: &str) -> Command {
        let mut cmd = Command::new("repo-upload");
        cmd.arg(artifact)
            .arg("--arch")
            .arg(&self.arch)
            .arg("--repo")
            .arg(repo);
        if let Some(bucket) = &self.upload_bucket {
            cmd.arg("--bucket").arg(bucket);
        }
        cmd
    }
}

impl BuildHost for DevtoolsHost {
    fn prepare_base(
        &self,
        base_root: &Path,
        cache_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        fs::create_dir_all(cache_dir)?;
        if base_root.exists() {
            info!("Using existing base root {}", base_root.display());
        } else {
            info!("Creating base root at {}", base_root.display());
            if let Some(parent) = base_root.parent() {
                fs::create_dir_all(parent)?;
            }
            self.run_checked(self.mkarchroot_command(base_root, cache_dir), cancel)
                .map_err(|e| Error::SandboxError(format!("mkarchroot failed: {}", e)))?;
        }
        Ok(())
    }

    fn refresh_databases(&self, root: &Path, cancel: &CancellationToken) -> Result<()> {
        self.run_checked(self.pacman_command(root, &["-Sy", "--noconfirm"], &[]), cancel)
            .map(|_| ())
    }

    fn snapshot(&self, base_root: &Path, dest: &Path, cancel: &CancellationToken) -> Result<()> {
        self.run_checked(self.snapshot_command(base_root, dest), cancel)
            .map(|_| ())
            .map_err(|e| match e {
                Error::Cancelled => Error::Cancelled,
                other => Error::SandboxError(format!(
                    "Failed to copy {} to {}: {}",
                    base_root.display(),
                    dest.display(),
                    other
                )),
            })
    }

    fn install_packages(
        &self,
        root: &Path,
        packages: &[String],
        cancel: &CancellationToken,
    ) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        self.run_checked(self.pacman_command(root, &["-S", "--noconfirm"], packages), cancel)
            .map(|_| ())
    }

    fn build(
        &self,
        request: &BuildRequest<'_>,
        cancel: &CancellationToken,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<CommandOutput> {
        let cmd = self.build_command(request);
        info!("Running: {:?}", cmd);
        run_streaming(cmd, cancel, on_line)
    }

    fn upload(&self, package_dir: &Path, repo: &str, cancel: &CancellationToken) -> Result<usize> {
        let artifacts = find_artifacts(package_dir);
        for artifact in &artifacts {
            self.run_checked(self.upload_command(artifact, repo), cancel)?;
            info!(
                "Uploaded {} to {}",
                artifact.file_name().unwrap_or_default().to_string_lossy(),
                repo
            );
        }
        Ok(artifacts.len())
    }

    fn remove_tree(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        let mut cmd = self.command("rm");
        cmd.args(["--recursive", "--force", "--one-file-system"])
            .arg(path);
        // Teardown has to finish even after an interrupt
        self.run_checked(cmd, &CancellationToken::new())
            .map(|_| ())
            .map_err(|e| Error::SandboxError(format!("Failed to remove {}: {}", path.display(), e)))
    }

    fn clear_cache(&self, cache_dir: &Path) -> Result<()> {
        let entries = match fs::read_dir(cache_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            self.remove_tree(&entry?.path())?;
        }
        info!("Cleared package cache {}", cache_dir.display());
        Ok(())
    }
}
