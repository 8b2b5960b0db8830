// src/index/state.rs

//! Flat version-state store
//!
//! The state store is a directory per repository (`core-x86_64/`,
//! `extra-x86_64/`) holding one small file per package base. Each file is a
//! single line of whitespace-separated fields; the second field is the
//! version. Records loaded this way carry no dependency information until
//! they are enriched from their PKGBUILDs.

use super::{PackageRecord, Repo};
use crate::blacklist::validate_package_name;
use crate::error::Result;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Parse one state file body into its version field
pub fn parse_state_line(content: &str) -> Option<&str> {
    content.split_whitespace().nth(1)
}

/// Load every package file in one repository directory
pub fn load_state_dir(dir: impl AsRef<Path>, repo: Repo) -> Result<Vec<PackageRecord>> {
    let dir = dir.as_ref();
    let mut records = Vec::new();

    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !validate_package_name(&name) {
            warn!("Ignoring state entry with invalid name: {}", name);
            continue;
        }

        let content = fs::read_to_string(entry.path())?;
        match parse_state_line(&content) {
            Some(version) => records.push(PackageRecord::new(&name, version, repo)),
            None => debug!("State entry {} has no version field", name),
        }
    }

    Ok(records)
}

/// Load a state tree, one `<repo>-<arch>` directory per repository
///
/// Directories for other architectures are ignored.
pub fn load_state_tree(root: impl AsRef<Path>, arch: &str) -> Result<Vec<PackageRecord>> {
    let root = root.as_ref();
    let suffix = format!("-{}", arch);
    let mut records = Vec::new();

    let mut dirs: Vec<_> = fs::read_dir(root)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .collect();
    dirs.sort_by_key(|e| e.file_name());

    for dir in dirs {
        let dir_name = dir.file_name().to_string_lossy().into_owned();
        let Some(repo_name) = dir_name.strip_suffix(&suffix) else {
            continue;
        };
        let repo = Repo::from_db_name(repo_name);
        let loaded = load_state_dir(dir.path(), repo)?;
        info!("Loaded {} entries from {}", loaded.len(), dir_name);
        records.extend(loaded);
    }

    Ok(records)
}
