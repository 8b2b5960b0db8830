// src/config.rs

//! Configuration file
//!
//! `archport.toml` in the working directory, or
//! `~/.config/archport/config.toml`, or whatever `--config` names. Every
//! section and field is optional:
//!
//! ```toml
//! [paths]
//! build_root = "/var/tmp/builder"
//! pkgbuilds_dir = "pkgbuilds"
//!
//! [[repos.reference]]
//! name = "core"
//! path = "mirror/x86_64/core.db"
//!
//! [[repos.target]]
//! name = "core"
//! path = "mirror/aarch64/core.db"
//!
//! [build]
//! stop_on_failure = true
//!
//! [bootstrap]
//! extra_repo_packages = ["valgrind"]
//! ```

use crate::bootstrap::BootstrapOptions;
use crate::error::{Error, Result};
use crate::index::archive::load_repo_db;
use crate::index::state::load_state_tree;
use crate::index::{PackageUniverse, Repo};
use crate::sandbox::{DEFAULT_LOG_RETENTION, DevtoolsHost, ExecutorOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Config file looked up in the working directory
pub const LOCAL_CONFIG: &str = "archport.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub repos: ReposConfig,
    pub build: BuildConfig,
    pub bootstrap: BootstrapOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Holds the base root (`root/`) and the sandboxes
    pub build_root: PathBuf,
    pub cache_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub pkgbuilds_dir: PathBuf,
    /// Lock file and progress markers
    pub state_dir: PathBuf,
    pub blacklist: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            build_root: PathBuf::from("/var/tmp/builder"),
            cache_dir: PathBuf::from("/var/tmp/builder/pacman-cache"),
            logs_dir: PathBuf::from("logs"),
            pkgbuilds_dir: PathBuf::from("pkgbuilds"),
            state_dir: PathBuf::from(".archport"),
            blacklist: PathBuf::from("blacklist.txt"),
        }
    }
}

/// One repository index archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSource {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReposConfig {
    /// Reference architecture index archives
    pub reference: Vec<RepoSource>,
    /// Target architecture index archives
    pub target: Vec<RepoSource>,
    /// Flat version-state store used instead of reference archives
    pub reference_state: Option<PathBuf>,
    pub reference_arch: String,
    pub target_arch: String,
}

impl Default for ReposConfig {
    fn default() -> Self {
        Self {
            reference: Vec::new(),
            target: Vec::new(),
            reference_state: None,
            reference_arch: "x86_64".to_string(),
            target_arch: "aarch64".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Failure logs kept per package
    pub log_retention: usize,
    pub upload_suffix: String,
    pub upload_bucket: Option<String>,
    pub use_sudo: bool,
    pub stop_on_failure: bool,
    pub preserve_failed: bool,
    pub no_upload: bool,
    pub pacman_conf: PathBuf,
    pub makepkg_conf: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            log_retention: DEFAULT_LOG_RETENTION,
            upload_suffix: "-testing".to_string(),
            upload_bucket: None,
            use_sudo: true,
            stop_on_failure: false,
            preserve_failed: false,
            no_upload: false,
            pacman_conf: PathBuf::from("chroot-config/pacman.conf"),
            makepkg_conf: PathBuf::from("chroot-config/makepkg.conf"),
        }
    }
}

impl Config {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigError(e.to_string()))
    }

    /// Load from `explicit`, or the first default location that exists
    ///
    /// An explicit path must exist; with no file anywhere the defaults apply.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            let content = fs::read_to_string(path)
                .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))?;
            info!("Using configuration {}", path.display());
            return Self::parse(&content);
        }

        for path in Self::default_locations() {
            if path.is_file() {
                let content = fs::read_to_string(&path)?;
                info!("Using configuration {}", path.display());
                return Self::parse(&content);
            }
        }
        debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    fn default_locations() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("archport").join("config.toml"));
        }
        paths
    }

    /// Build the reference universe from the configured sources
    pub fn load_reference(&self) -> Result<PackageUniverse> {
        if let Some(state) = &self.repos.reference_state {
            let records = load_state_tree(state, &self.repos.reference_arch)?;
            return PackageUniverse::from_records(records);
        }
        load_sources(&self.repos.reference, "reference")
    }

    pub fn load_target(&self) -> Result<PackageUniverse> {
        load_sources(&self.repos.target, "target")
    }

    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            build_root: self.paths.build_root.clone(),
            cache_dir: self.paths.cache_dir.clone(),
            upload_suffix: self.build.upload_suffix.clone(),
            no_upload: self.build.no_upload,
            preserve_failed: self.build.preserve_failed,
            clear_cache: false,
            echo_output: true,
        }
    }

    pub fn devtools_host(&self) -> DevtoolsHost {
        DevtoolsHost {
            use_sudo: self.build.use_sudo,
            pacman_conf: self.build.pacman_conf.clone(),
            makepkg_conf: self.build.makepkg_conf.clone(),
            arch: self.repos.target_arch.clone(),
            upload_bucket: self.build.upload_bucket.clone(),
        }
    }
}

fn load_sources(sources: &[RepoSource], label: &str) -> Result<PackageUniverse> {
    if sources.is_empty() {
        return Err(Error::ConfigError(format!(
            "no {} repositories configured",
            label
        )));
    }
    let mut universe = PackageUniverse::new();
    for source in sources {
        let records = load_repo_db(&source.path, Repo::from_db_name(&source.name))?;
        universe.extend(records)?;
    }
    info!(
        "Loaded {} {} packages ({} architecture-independent)",
        universe.len(),
        label,
        universe.any_len()
    );
    Ok(universe)
}
