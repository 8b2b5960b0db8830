// src/plan.rs

//! Build plans and retry files
//!
//! A plan is the ordered candidate list the executor consumes, stored as
//! pretty JSON with a provenance header:
//!
//! ```json
//! {
//!   "_command": "archport plan --missing",
//!   "_timestamp": "2026-10-17T12:00:00+00:00",
//!   "packages": [ { "name": "zlib", "version": "1:1.3.1-2", ... } ]
//! }
//! ```
//!
//! The retry file has the same shape and lists only failed packages.

use crate::blacklist::validate_package_name;
use crate::error::{Error, Result};
use crate::index::{PackageRecord, Repo};
use crate::version::{DepSpec, compare_versions};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Default plan file name
pub const PLAN_FILE: &str = "packages_to_build.json";

/// Default retry file name
pub const RETRY_FILE: &str = "failed_packages.json";

/// A basename selected for building
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePackage {
    pub name: String,
    pub basename: String,
    pub version: String,
    pub repo: Repo,
    #[serde(default)]
    pub current_version: Option<String>,
    #[serde(default)]
    pub depends: Vec<DepSpec>,
    #[serde(default)]
    pub makedepends: Vec<DepSpec>,
    #[serde(default)]
    pub checkdepends: Vec<DepSpec>,
    #[serde(default)]
    pub provides: Vec<DepSpec>,
    #[serde(default)]
    pub force_latest: bool,
    #[serde(default, rename = "use_aur")]
    pub use_alternate_source: bool,
    #[serde(default)]
    pub skip: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default)]
    pub build_stage: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_group: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_reason: Option<String>,
    /// Split package names built from this basename
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,
}

impl CandidatePackage {
    /// Build a candidate for a basename from its reference records
    ///
    /// Dependencies are the union over all split packages, provides likewise,
    /// with first-seen order kept.
    pub fn from_group(basename: &str, records: &[&PackageRecord]) -> Option<Self> {
        let first = records.first()?;
        let mut candidate = Self::bare(basename, &first.version, first.repo);

        for record in records {
            candidate.packages.push(record.name.clone());
            merge_specs(&mut candidate.depends, &record.depends);
            merge_specs(&mut candidate.makedepends, &record.makedepends);
            merge_specs(&mut candidate.checkdepends, &record.checkdepends);
            merge_specs(&mut candidate.provides, &record.provides);
        }
        Some(candidate)
    }

    /// A candidate with no dependency information
    pub fn bare(basename: &str, version: &str, repo: Repo) -> Self {
        Self {
            name: basename.to_string(),
            basename: basename.to_string(),
            version: version.to_string(),
            repo,
            current_version: None,
            depends: Vec::new(),
            makedepends: Vec::new(),
            checkdepends: Vec::new(),
            provides: Vec::new(),
            force_latest: false,
            use_alternate_source: false,
            skip: false,
            skip_reason: None,
            build_stage: 0,
            cycle_group: None,
            added_reason: None,
            packages: Vec::new(),
        }
    }

    /// Every dependency in declaration order
    pub fn all_dependencies(&self) -> impl Iterator<Item = &DepSpec> {
        self.depends
            .iter()
            .chain(self.makedepends.iter())
            .chain(self.checkdepends.iter())
    }

    /// Deduplicated dependency names, first occurrence order
    pub fn dependency_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for dep in self.all_dependencies() {
            if !names.iter().any(|n| n == &dep.name) {
                names.push(dep.name.clone());
            }
        }
        names
    }

    /// Names this candidate answers to: its own name, basename and split names
    pub fn supplied_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str())
            .chain(std::iter::once(self.basename.as_str()))
            .chain(self.packages.iter().map(String::as_str))
    }

    /// How this candidate relates to the target architecture
    pub fn change(&self) -> ChangeKind {
        match &self.current_version {
            None => ChangeKind::New,
            Some(current) => match compare_versions(current, &self.version) {
                Ordering::Less => ChangeKind::Upgrade,
                Ordering::Equal => ChangeKind::Rebuild,
                Ordering::Greater => ChangeKind::Downgrade,
            },
        }
    }
}

fn merge_specs(into: &mut Vec<DepSpec>, from: &[DepSpec]) {
    for spec in from {
        if !into.contains(spec) {
            into.push(spec.clone());
        }
    }
}

/// Relationship between the planned and the current target version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeKind {
    Upgrade,
    New,
    Rebuild,
    Downgrade,
}

/// Persisted build plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildPlan {
    #[serde(rename = "_command", default)]
    pub command: String,
    #[serde(rename = "_timestamp", default = "Local::now")]
    pub timestamp: DateTime<Local>,
    pub packages: Vec<CandidatePackage>,
}

impl BuildPlan {
    pub fn new(command: impl Into<String>, packages: Vec<CandidatePackage>) -> Self {
        Self {
            command: command.into(),
            timestamp: Local::now(),
            packages,
        }
    }

    /// Load and validate a plan file
    ///
    /// Every package name and basename must pass name validation; a single
    /// bad entry rejects the whole file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| Error::InvalidPlan {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let plan: BuildPlan = serde_json::from_str(&content).map_err(|e| Error::InvalidPlan {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        for package in &plan.packages {
            for name in std::iter::once(&package.name)
                .chain(std::iter::once(&package.basename))
                .chain(package.packages.iter())
            {
                if !validate_package_name(name) {
                    return Err(Error::InvalidPackageName(name.clone()));
                }
            }
        }

        Ok(plan)
    }

    /// Write the plan atomically
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        info!(
            "Wrote {} packages to {}",
            self.packages.len(),
            path.display()
        );
        Ok(())
    }

    /// A retry plan holding only the given failed packages
    pub fn retry(&self, failed: Vec<CandidatePackage>) -> Self {
        Self {
            command: self.command.clone(),
            timestamp: Local::now(),
            packages: failed,
        }
    }

    /// Packages that will actually be built
    pub fn buildable(&self) -> impl Iterator<Item = &CandidatePackage> {
        self.packages.iter().filter(|p| !p.skip)
    }

    /// Summary counts for reporting
    pub fn summary(&self) -> PlanSummary {
        PlanSummary::from_packages(&self.packages)
    }
}

/// Counts shown after planning
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub total: usize,
    pub skipped: usize,
    pub upgrades: usize,
    pub new: usize,
    pub rebuilds: usize,
    pub downgrades: usize,
    pub pulled_in: usize,
    pub stages: BTreeMap<u32, usize>,
}

impl PlanSummary {
    pub fn from_packages(packages: &[CandidatePackage]) -> Self {
        let mut summary = Self {
            total: packages.len(),
            ..Default::default()
        };
        for package in packages {
            if package.skip {
                summary.skipped += 1;
                continue;
            }
            match package.change() {
                ChangeKind::Upgrade => summary.upgrades += 1,
                ChangeKind::New => summary.new += 1,
                ChangeKind::Rebuild => summary.rebuilds += 1,
                ChangeKind::Downgrade => summary.downgrades += 1,
            }
            if package.added_reason.is_some() {
                summary.pulled_in += 1;
            }
            *summary.stages.entry(package.build_stage).or_default() += 1;
        }
        summary
    }
}
