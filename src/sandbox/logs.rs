// src/sandbox/logs.rs

//! Retained failure logs
//!
//! Each failed build leaves `<pkg>-<YYYYmmdd-HHMMSS>-build.log` in the logs
//! directory. Only the newest few logs per package are kept.

use crate::error::Result;
use chrono::Local;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

/// Default number of logs kept per package
pub const DEFAULT_LOG_RETENTION: usize = 3;

/// Suffix of a log name after the `<pkg>-` prefix
static LOG_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{8}-\d{6}(-\d+)?-build\.log$").expect("Invalid log name regex")
});

#[derive(Debug, Clone)]
pub struct BuildLogStore {
    dir: PathBuf,
    retention: usize,
}

impl BuildLogStore {
    pub fn new(dir: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            dir: dir.into(),
            retention: retention.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a failure log and prune older logs for the same package
    pub fn write_failure(&self, package: &str, exit_code: i32, output: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let now = Local::now();
        let stamp = now.format("%Y%m%d-%H%M%S").to_string();
        let mut path = self.dir.join(format!("{}-{}-build.log", package, stamp));
        // Two failures within one second
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{}-{}-{}-build.log", package, stamp, n));
            n += 1;
        }

        let content = format!(
            "Package: {}\nTimestamp: {}\nExit code: {}\n{}\n{}",
            package,
            now.to_rfc3339(),
            exit_code,
            "=".repeat(72),
            output
        );
        fs::write(&path, content)?;
        info!("Build log for {} saved to {}", package, path.display());

        self.rotate(package)?;
        Ok(path)
    }

    /// Logs belonging to `package`, oldest first
    pub fn logs_for(&self, package: &str) -> Result<Vec<PathBuf>> {
        let prefix = format!("{}-", package);
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut logs: Vec<(std::time::SystemTime, String, u32, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            // `foo-` is also a prefix of `foo-bar-...`; the suffix check settles it
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            let Some(caps) = LOG_SUFFIX.captures(rest) else {
                continue;
            };
            let counter = caps
                .get(1)
                .and_then(|m| m.as_str()[1..].parse().ok())
                .unwrap_or(0);
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::UNIX_EPOCH);
            logs.push((modified, rest[..15].to_string(), counter, entry.path()));
        }

        logs.sort();
        Ok(logs.into_iter().map(|(_, _, _, path)| path).collect())
    }

    /// Delete all but the newest `retention` logs for `package`
    pub fn rotate(&self, package: &str) -> Result<usize> {
        let logs = self.logs_for(package)?;
        let excess = logs.len().saturating_sub(self.retention);
        for old in &logs[..excess] {
            match fs::remove_file(old) {
                Ok(()) => debug!("Removed old build log {}", old.display()),
                Err(e) => warn!("Failed to remove old build log {}: {}", old.display(), e),
            }
        }
        Ok(excess)
    }
}
