// src/index/mod.rs

//! Package universes for one architecture
//!
//! A [`PackageUniverse`] maps package names to [`PackageRecord`]s and keeps
//! architecture-independent (`ARCH=any`) records apart so they never take
//! part in the cross-architecture diff. Universes are built once from
//! repository databases ([`archive`]) or a flat version store ([`state`])
//! and are read-only afterwards.
//!
//! # Example
//!
//! ```ignore
//! use archport::index::{PackageUniverse, Repo};
//!
//! let mut universe = PackageUniverse::new();
//! for (repo, path) in [(Repo::Core, "core.db"), (Repo::Extra, "extra.db")] {
//!     universe.extend(archport::index::archive::load_repo_db(path, repo)?)?;
//! }
//! let providers = universe.provides_map();
//! ```

pub mod archive;
pub mod state;

use crate::error::{Error, Result};
use crate::version::DepSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Repository a package is published in
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Repo {
    Core,
    Extra,
    Other,
}

impl Repo {
    /// Map a repository directory or database name onto a repo
    ///
    /// Accepts bare names (`core`) and state-store directory names
    /// (`core-x86_64`, `extra-testing-x86_64`).
    pub fn from_db_name(name: &str) -> Self {
        let lead = name.split('-').next().unwrap_or(name);
        lead.parse().unwrap_or(Repo::Other)
    }

    /// Name of the staging repository artifacts are uploaded to
    pub fn staging_name(&self, suffix: &str) -> String {
        format!("{}{}", self.as_ref(), suffix)
    }
}

/// One binary package from a repository index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub basename: String,
    pub version: String,
    pub repo: Repo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(default)]
    pub depends: Vec<DepSpec>,
    #[serde(default)]
    pub makedepends: Vec<DepSpec>,
    #[serde(default)]
    pub checkdepends: Vec<DepSpec>,
    #[serde(default)]
    pub provides: Vec<DepSpec>,
}

impl PackageRecord {
    /// Create a record with no dependency information
    pub fn new(name: &str, version: &str, repo: Repo) -> Self {
        Self {
            name: name.to_string(),
            basename: name.to_string(),
            version: version.to_string(),
            repo,
            arch: None,
            depends: Vec::new(),
            makedepends: Vec::new(),
            checkdepends: Vec::new(),
            provides: Vec::new(),
        }
    }

    /// Set the basename (builder style)
    pub fn with_basename(mut self, basename: &str) -> Self {
        self.basename = basename.to_string();
        self
    }

    /// True for `ARCH=any` packages
    pub fn is_arch_independent(&self) -> bool {
        self.arch.as_deref() == Some("any")
    }

    /// Runtime, build and check dependencies in declaration order
    pub fn all_dependencies(&self) -> impl Iterator<Item = &DepSpec> {
        self.depends
            .iter()
            .chain(self.makedepends.iter())
            .chain(self.checkdepends.iter())
    }
}

/// All packages of one architecture
#[derive(Debug, Clone, Default)]
pub struct PackageUniverse {
    packages: BTreeMap<String, PackageRecord>,
    any: BTreeMap<String, PackageRecord>,
    basename_repos: BTreeMap<String, Repo>,
}

impl PackageUniverse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a universe from records, enforcing one repo per basename
    pub fn from_records<I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = PackageRecord>,
    {
        let mut universe = Self::new();
        universe.extend(records)?;
        Ok(universe)
    }

    /// Add more records, typically another repository's index
    pub fn extend<I>(&mut self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = PackageRecord>,
    {
        for record in records {
            self.insert(record)?;
        }
        Ok(())
    }

    /// Insert a record
    ///
    /// A basename published by two different repositories is an integrity
    /// error. A repeated package name keeps the first record.
    pub fn insert(&mut self, record: PackageRecord) -> Result<()> {
        match self.basename_repos.get(&record.basename) {
            Some(repo) if *repo != record.repo => {
                return Err(Error::DuplicateBasename {
                    basename: record.basename.clone(),
                    first: repo.to_string(),
                    second: record.repo.to_string(),
                });
            }
            Some(_) => {}
            None => {
                self.basename_repos
                    .insert(record.basename.clone(), record.repo);
            }
        }

        let target = if record.is_arch_independent() {
            &mut self.any
        } else {
            &mut self.packages
        };

        if target.contains_key(&record.name) {
            warn!(
                "Duplicate package entry {} in {}, keeping the first",
                record.name, record.repo
            );
            return Ok(());
        }
        target.insert(record.name.clone(), record);
        Ok(())
    }

    /// Architecture-specific record by name
    pub fn get(&self, name: &str) -> Option<&PackageRecord> {
        self.packages.get(name)
    }

    /// Architecture-independent record by name
    pub fn get_any(&self, name: &str) -> Option<&PackageRecord> {
        self.any.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Architecture-specific records in name order
    pub fn iter(&self) -> impl Iterator<Item = &PackageRecord> {
        self.packages.values()
    }

    /// Architecture-independent records in name order
    pub fn iter_any(&self) -> impl Iterator<Item = &PackageRecord> {
        self.any.values()
    }

    /// Number of architecture-independent records
    pub fn any_len(&self) -> usize {
        self.any.len()
    }

    /// Group architecture-specific names by basename
    pub fn basename_groups(&self) -> BTreeMap<String, Vec<String>> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for record in self.packages.values() {
            groups
                .entry(record.basename.clone())
                .or_default()
                .push(record.name.clone());
        }
        groups
    }

    /// Map every real and virtual name to the package that supplies it
    ///
    /// Real names are registered first, then provides in package name
    /// order. The first writer wins; later claims are ignored.
    pub fn provides_map(&self) -> BTreeMap<String, String> {
        let mut map: BTreeMap<String, String> = self
            .packages
            .keys()
            .map(|name| (name.clone(), name.clone()))
            .collect();

        for record in self.packages.values() {
            for provide in &record.provides {
                match map.get(&provide.name) {
                    Some(existing) if existing != &record.name => {
                        debug!(
                            "{} is already provided by {}, ignoring claim from {}",
                            provide.name, existing, record.name
                        );
                    }
                    Some(_) => {}
                    None => {
                        map.insert(provide.name.clone(), record.name.clone());
                    }
                }
            }
        }
        map
    }

    /// Basenames whose runtime or build dependencies mention `name`
    pub fn dependents(&self, name: &str) -> Vec<String> {
        let mut found: Vec<String> = self
            .packages
            .values()
            .chain(self.any.values())
            .filter(|r| {
                r.depends
                    .iter()
                    .chain(r.makedepends.iter())
                    .any(|d| d.name == name)
            })
            .map(|r| r.basename.clone())
            .collect();
        found.sort();
        found.dedup();
        found
    }
}
