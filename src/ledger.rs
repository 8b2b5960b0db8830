// src/ledger.rs

//! Resume marker for interrupted batches
//!
//! After each successful package the batch records how far it got. A later
//! run with `--continue` reads the marker once and starts right after it.
//! The file holds a single line, `index:<n>` or `package:<name>`; bare
//! numbers and bare names written by older tooling are accepted too.

use crate::error::Result;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default ledger file name for package batches
pub const BATCH_LEDGER: &str = "last_successful";

/// Default ledger file name for the toolchain bootstrap
pub const BOOTSTRAP_LEDGER: &str = "bootstrap_progress.txt";

/// The last completed unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressMarker {
    /// Zero-based index of the last completed package
    Index(usize),
    /// Name of the last completed package
    Package(String),
}

impl ProgressMarker {
    fn encode(&self) -> String {
        match self {
            ProgressMarker::Index(i) => format!("index:{}", i),
            ProgressMarker::Package(name) => format!("package:{}", name),
        }
    }

    fn decode(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if let Some(i) = line.strip_prefix("index:") {
            return i.trim().parse().ok().map(ProgressMarker::Index);
        }
        if let Some(name) = line.strip_prefix("package:") {
            return Some(ProgressMarker::Package(name.trim().to_string()));
        }
        match line.parse() {
            Ok(i) => Some(ProgressMarker::Index(i)),
            Err(_) => Some(ProgressMarker::Package(line.to_string())),
        }
    }

    /// Where to resume in an ordered list of package names
    ///
    /// An index marker resumes at the next index. A name marker resumes
    /// after that name, or from the start if the name is no longer listed.
    pub fn resume_offset<S: AsRef<str>>(&self, names: &[S]) -> usize {
        match self {
            ProgressMarker::Index(i) => (i + 1).min(names.len()),
            ProgressMarker::Package(name) => {
                match names.iter().position(|n| n.as_ref() == name.as_str()) {
                    Some(pos) => pos + 1,
                    None => {
                        warn!("Last completed package {} is not in the plan, starting over", name);
                        0
                    }
                }
            }
        }
    }
}

/// File-backed progress marker
#[derive(Debug, Clone)]
pub struct ProgressLedger {
    path: PathBuf,
}

impl ProgressLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the marker; a missing or empty file means no progress
    pub fn read(&self) -> Result<Option<ProgressMarker>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content.lines().next().and_then(ProgressMarker::decode)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the marker atomically
    pub fn record(&self, marker: &ProgressMarker) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        writeln!(tmp, "{}", marker.encode())?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        debug!("Recorded progress {:?}", marker);
        Ok(())
    }

    /// Remove the marker after a complete batch
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Cleared progress marker {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Offset to start at, or 0 when there is no marker
    pub fn resume_offset<S: AsRef<str>>(&self, names: &[S]) -> Result<usize> {
        Ok(self
            .read()?
            .map(|marker| marker.resume_offset(names))
            .unwrap_or(0))
    }
}
