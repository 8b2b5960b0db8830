// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use archport::cancel::CancellationToken;
use archport::index::Repo;
use archport::ledger::{BATCH_LEDGER, ProgressLedger};
use archport::plan::{BuildPlan, CandidatePackage};
use archport::progress::{PackageStatus, ProgressTracker};
use archport::sandbox::stream::CommandOutput;
use archport::sandbox::{
    BuildHost, BuildLogStore, BuildRequest, ExecutorOptions, SANDBOX_PREFIX, SandboxExecutor,
};
use archport::{Error, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

/// Build host that records every call and touches only the scratch directory
#[derive(Default)]
pub struct RecordingHost {
    /// Packages whose build exits non-zero
    pub failing: HashSet<String>,
    /// Package whose build is interrupted
    pub cancel_during: Option<String>,
    pub fail_refresh: bool,
    pub fail_install: bool,
    /// Artifacts reported per upload
    pub artifacts: usize,
    pub calls: RefCell<Vec<String>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self {
            artifacts: 1,
            ..Default::default()
        }
    }

    pub fn failing(mut self, packages: &[&str]) -> Self {
        self.failing = packages.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn cancel_during(mut self, package: &str) -> Self {
        self.cancel_during = Some(package.to_string());
        self
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Calls starting with `prefix`
    pub fn calls_with(&self, prefix: &str) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Packages built, in order
    pub fn built(&self) -> Vec<String> {
        self.calls_with("build ")
            .into_iter()
            .map(|c| c.trim_start_matches("build ").to_string())
            .collect()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl BuildHost for RecordingHost {
    fn prepare_base(&self, base: &Path, _: &Path, _: &CancellationToken) -> Result<()> {
        self.record("prepare".to_string());
        fs::create_dir_all(base)?;
        Ok(())
    }

    fn refresh_databases(&self, root: &Path, _: &CancellationToken) -> Result<()> {
        self.record(format!("refresh {}", file_name(root)));
        if self.fail_refresh {
            return Err(Error::CommandFailed("mirror unreachable".to_string()));
        }
        Ok(())
    }

    fn snapshot(&self, _: &Path, dest: &Path, _: &CancellationToken) -> Result<()> {
        self.record(format!("snapshot {}", file_name(dest)));
        fs::create_dir_all(dest)?;
        Ok(())
    }

    fn install_packages(
        &self,
        root: &Path,
        packages: &[String],
        _: &CancellationToken,
    ) -> Result<()> {
        self.record(format!("install {} {}", file_name(root), packages.join(" ")));
        if self.fail_install {
            return Err(Error::CommandFailed("target not found".to_string()));
        }
        Ok(())
    }

    fn build(
        &self,
        request: &BuildRequest<'_>,
        cancel: &CancellationToken,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<CommandOutput> {
        self.record(format!("build {}", request.package));
        if self.cancel_during.as_deref() == Some(request.package) {
            cancel.cancel();
            return Err(Error::Cancelled);
        }
        on_line("==> Starting build()...");
        if self.failing.contains(request.package) {
            on_line("error: compilation failed");
            return Ok(CommandOutput {
                exit_code: 2,
                output: "==> Starting build()...\nerror: compilation failed\n".to_string(),
            });
        }
        Ok(CommandOutput {
            exit_code: 0,
            output: "==> Starting build()...\n".to_string(),
        })
    }

    fn upload(&self, _: &Path, repo: &str, _: &CancellationToken) -> Result<usize> {
        self.record(format!("upload {}", repo));
        Ok(self.artifacts)
    }

    fn remove_tree(&self, path: &Path) -> Result<()> {
        self.record(format!("remove {}", file_name(path)));
        if path.exists() {
            fs::remove_dir_all(path)?;
        }
        Ok(())
    }

    fn clear_cache(&self, _: &Path) -> Result<()> {
        self.record("clear-cache".to_string());
        Ok(())
    }
}

/// Tracker that keeps every transition as a line of text
#[derive(Default)]
pub struct RecordingProgress {
    pub events: Mutex<Vec<String>>,
}

impl RecordingProgress {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressTracker for RecordingProgress {
    fn run_started(&self, total: usize) {
        self.push(format!("run {}", total));
    }

    fn stage_started(&self, stage: &str) {
        self.push(stage.to_string());
    }

    fn package_started(&self, name: &str, _version: &str) {
        self.push(format!("start {}", name));
    }

    fn package_finished(&self, name: &str, status: PackageStatus) {
        self.push(format!("{} {}", status, name));
    }

    fn run_finished(&self, built: usize, failed: usize, error: Option<&str>) {
        match error {
            Some(_) => self.push(format!("aborted {} {}", built, failed)),
            None => self.push(format!("finished {} {}", built, failed)),
        }
    }
}

/// Scratch layout: build root with a base root, checkouts, logs, state
pub struct Workspace {
    pub temp: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let ws = Self { temp };
        fs::create_dir_all(ws.build_root().join("root")).unwrap();
        fs::create_dir_all(ws.pkgbuilds()).unwrap();
        fs::create_dir_all(ws.state()).unwrap();
        ws
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn build_root(&self) -> PathBuf {
        self.path().join("build")
    }

    pub fn pkgbuilds(&self) -> PathBuf {
        self.path().join("pkgbuilds")
    }

    pub fn logs(&self) -> PathBuf {
        self.path().join("logs")
    }

    pub fn state(&self) -> PathBuf {
        self.path().join("state")
    }

    pub fn retry_path(&self) -> PathBuf {
        self.path().join("failed_packages.json")
    }

    pub fn ledger(&self) -> ProgressLedger {
        ProgressLedger::new(self.state().join(BATCH_LEDGER))
    }

    pub fn options(&self, preserve_failed: bool) -> ExecutorOptions {
        ExecutorOptions {
            build_root: self.build_root(),
            cache_dir: self.path().join("cache"),
            preserve_failed,
            echo_output: false,
            ..Default::default()
        }
    }

    pub fn executor(
        &self,
        host: RecordingHost,
        preserve_failed: bool,
    ) -> SandboxExecutor<RecordingHost> {
        let logs = BuildLogStore::new(self.logs(), 3);
        SandboxExecutor::new(
            host,
            self.options(preserve_failed),
            logs,
            CancellationToken::new(),
        )
    }

    /// Write a minimal PKGBUILD checkout for `name`
    pub fn write_pkgbuild(&self, name: &str, version: &str) {
        let dir = self.pkgbuilds().join(name);
        fs::create_dir_all(&dir).unwrap();
        let (pkgver, pkgrel) = version.rsplit_once('-').unwrap_or((version, "1"));
        fs::write(
            dir.join("PKGBUILD"),
            format!(
                "pkgname={}\npkgver={}\npkgrel={}\narch=(x86_64 aarch64)\n",
                name, pkgver, pkgrel
            ),
        )
        .unwrap();
    }

    /// Sandbox directories currently in the build root
    pub fn sandboxes(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.build_root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(SANDBOX_PREFIX))
            .collect();
        names.sort();
        names
    }
}

pub fn candidate(name: &str, version: &str) -> CandidatePackage {
    CandidatePackage::bare(name, version, Repo::Extra)
}

/// Plan with one candidate per name, all checked out
pub fn plan_with_checkouts(ws: &Workspace, names: &[&str]) -> BuildPlan {
    let packages = names
        .iter()
        .map(|name| {
            ws.write_pkgbuild(name, "1.0-1");
            candidate(name, "1.0-1")
        })
        .collect();
    BuildPlan::new("archport plan", packages)
}

/// One package entry in a fixture repository database
#[derive(Debug, Clone, Default)]
pub struct DbEntry {
    pub name: String,
    pub version: String,
    pub base: Option<String>,
    pub arch: String,
    pub depends: Vec<String>,
    pub makedepends: Vec<String>,
    pub provides: Vec<String>,
}

impl DbEntry {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            arch: "x86_64".to_string(),
            ..Default::default()
        }
    }

    pub fn base(mut self, base: &str) -> Self {
        self.base = Some(base.to_string());
        self
    }

    pub fn arch(mut self, arch: &str) -> Self {
        self.arch = arch.to_string();
        self
    }

    pub fn depends(mut self, deps: &[&str]) -> Self {
        self.depends = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn makedepends(mut self, deps: &[&str]) -> Self {
        self.makedepends = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn provides(mut self, provides: &[&str]) -> Self {
        self.provides = provides.iter().map(|p| p.to_string()).collect();
        self
    }

    fn desc(&self) -> String {
        let mut desc = format!(
            "%FILENAME%\n{}-{}-{}.pkg.tar.zst\n\n%NAME%\n{}\n\n",
            self.name, self.version, self.arch, self.name
        );
        if let Some(base) = &self.base {
            desc.push_str(&format!("%BASE%\n{}\n\n", base));
        }
        desc.push_str(&format!("%VERSION%\n{}\n\n%ARCH%\n{}\n\n", self.version, self.arch));
        for (key, values) in [
            ("DEPENDS", &self.depends),
            ("MAKEDEPENDS", &self.makedepends),
            ("PROVIDES", &self.provides),
        ] {
            if !values.is_empty() {
                desc.push_str(&format!("%{}%\n{}\n\n", key, values.join("\n")));
            }
        }
        desc
    }
}

/// Write a gzip-compressed repository database to `path`
pub fn write_repo_db(path: &Path, entries: &[DbEntry]) {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for entry in entries {
        let desc = entry.desc();
        let mut header = tar::Header::new_gnu();
        header.set_size(desc.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(
                &mut header,
                format!("{}-{}/desc", entry.name, entry.version),
                desc.as_bytes(),
            )
            .unwrap();
    }
    let bytes = builder.into_inner().unwrap().finish().unwrap();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, bytes).unwrap();
}
