// src/reconcile/mod.rs

//! Reference/target reconciliation
//!
//! Decides which basenames from the reference architecture need to be built
//! for the target architecture. The decision walks reference basenames in
//! sorted order and applies, in turn, the blacklist, the toolchain rule,
//! the repository refresh filter, the explicit force list, missing-only mode
//! and finally a plain version comparison. Afterwards every dependency of
//! an included candidate that exists in the reference but not in the target
//! is pulled in, transitively.
//!
//! # Example
//!
//! ```ignore
//! use archport::reconcile::{ReconcilePolicy, Reconciler};
//!
//! let policy = ReconcilePolicy::default().with_missing_only(true);
//! let result = Reconciler::new(&reference, &target, &policy).reconcile();
//! for advisory in &result.advisories {
//!     println!("{}", advisory);
//! }
//! ```

mod analyze;

pub use analyze::{RepoAnalysis, RepoMismatch, VersionSkew, analyze_repositories};

use crate::blacklist::Blacklist;
use crate::index::{PackageRecord, PackageUniverse, Repo};
use crate::plan::CandidatePackage;
use crate::version::{is_version_newer, try_compare_versions};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info, warn};

/// Basenames that only the two-stage toolchain bootstrap may rebuild
pub const TOOLCHAIN_BASENAMES: [&str; 4] = ["linux-api-headers", "glibc", "binutils", "gcc"];

pub fn is_toolchain(basename: &str) -> bool {
    TOOLCHAIN_BASENAMES.contains(&basename)
}

/// Knobs controlling candidate selection
#[derive(Debug, Clone, Default)]
pub struct ReconcilePolicy {
    /// Explicit basenames or split names to build, in command-line order
    pub force_list: Vec<String>,
    pub blacklist: Blacklist,
    /// Only consider basenames absent from the target
    pub missing_only: bool,
    /// Rebuild every basename of one repository regardless of version
    pub rebuild_repo: Option<Repo>,
    /// Forced packages build from the newest source revision
    pub use_latest_revision: bool,
    /// Basenames whose sources come from the alternate source host
    pub alternate_source: BTreeSet<String>,
    /// Allow forcing `ARCH=any` packages
    pub include_any: bool,
}

impl ReconcilePolicy {
    pub fn with_force_list(mut self, names: Vec<String>) -> Self {
        self.force_list = names;
        self
    }

    pub fn with_blacklist(mut self, blacklist: Blacklist) -> Self {
        self.blacklist = blacklist;
        self
    }

    pub fn with_missing_only(mut self, missing_only: bool) -> Self {
        self.missing_only = missing_only;
        self
    }

    pub fn with_rebuild_repo(mut self, repo: Option<Repo>) -> Self {
        self.rebuild_repo = repo;
        self
    }
}

/// Why a basename was left out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Blacklisted { pattern: String, name: String },
    Toolchain,
    DependsOnBlacklisted { dependency: String },
    UnparseableVersion { reference: String, target: String },
    ArchitectureIndependent,
    NotInReference,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Blacklisted { pattern, name } => {
                write!(f, "blacklisted ({} matches '{}')", name, pattern)
            }
            SkipReason::Toolchain => write!(f, "toolchain package, use bootstrap"),
            SkipReason::DependsOnBlacklisted { dependency } => {
                write!(f, "depends on blacklisted {}", dependency)
            }
            SkipReason::UnparseableVersion { reference, target } => {
                write!(f, "cannot compare {} with {}", reference, target)
            }
            SkipReason::ArchitectureIndependent => write!(f, "architecture independent"),
            SkipReason::NotInReference => write!(f, "not in reference repositories"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipRecord {
    pub basename: String,
    pub reason: SkipReason,
}

/// Operator-facing notices produced while reconciling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    /// A toolchain basename is behind and needs the bootstrap path
    StaleToolchain {
        basename: String,
        reference_version: String,
        target_version: Option<String>,
    },
    /// A `-bin` package in the target provides a basename the target lacks
    BinaryProvider {
        basename: String,
        provider: String,
        provided_version: Option<String>,
        reference_version: String,
    },
    /// A missing dependency is a toolchain package
    MissingToolchainDependency {
        dependency: String,
        required_by: String,
    },
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::StaleToolchain {
                basename,
                reference_version,
                target_version,
            } => write!(
                f,
                "{} is outdated ({} -> {}), run the toolchain bootstrap",
                basename,
                target_version.as_deref().unwrap_or("missing"),
                reference_version
            ),
            Advisory::BinaryProvider {
                basename,
                provider,
                provided_version,
                reference_version,
            } => match provided_version {
                Some(v) if is_version_newer(v, reference_version) => write!(
                    f,
                    "{} is provided by {} at {}, outdated against {}",
                    basename, provider, v, reference_version
                ),
                Some(v) => write!(
                    f,
                    "{} is provided by {} at {} (reference {})",
                    basename, provider, v, reference_version
                ),
                None => write!(f, "{} is provided by {}", basename, provider),
            },
            Advisory::MissingToolchainDependency {
                dependency,
                required_by,
            } => write!(
                f,
                "{} needs toolchain package {}, run the toolchain bootstrap",
                required_by, dependency
            ),
        }
    }
}

/// Outcome of a reconciliation pass
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub candidates: Vec<CandidatePackage>,
    pub skipped: Vec<SkipRecord>,
    /// Blacklisted basenames that were missing from the target
    pub skipped_missing: Vec<String>,
    pub advisories: Vec<Advisory>,
}

/// Diff engine over a reference and a target universe
pub struct Reconciler<'a> {
    reference: &'a PackageUniverse,
    policy: &'a ReconcilePolicy,
    reference_groups: BTreeMap<String, Vec<String>>,
    reference_provides: BTreeMap<String, String>,
    target_versions: BTreeMap<String, String>,
    target_provides: BTreeMap<String, String>,
    bin_providers: BTreeMap<String, (String, Option<String>)>,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        reference: &'a PackageUniverse,
        target: &'a PackageUniverse,
        policy: &'a ReconcilePolicy,
    ) -> Self {
        let mut target_versions = BTreeMap::new();
        let mut bin_providers = BTreeMap::new();
        for record in target.iter() {
            target_versions
                .entry(record.basename.clone())
                .or_insert_with(|| record.version.clone());
            if record.name.ends_with("-bin") {
                for provide in &record.provides {
                    bin_providers
                        .entry(provide.name.clone())
                        .or_insert_with(|| (record.name.clone(), provide.version.clone()));
                }
            }
        }

        Self {
            reference,
            policy,
            reference_groups: reference.basename_groups(),
            reference_provides: reference.provides_map(),
            target_versions,
            target_provides: target.provides_map(),
            bin_providers,
        }
    }

    /// True when the target has nothing answering to this name
    fn missing_in_target(&self, name: &str) -> bool {
        !self.target_versions.contains_key(name) && !self.target_provides.contains_key(name)
    }

    fn group_records(&self, basename: &str) -> Vec<&'a PackageRecord> {
        let reference = self.reference;
        self.reference_groups
            .get(basename)
            .map(|names| names.iter().filter_map(|n| reference.get(n)).collect())
            .unwrap_or_default()
    }

    fn candidate(&self, basename: &str, records: &[&PackageRecord]) -> Option<CandidatePackage> {
        let mut candidate = CandidatePackage::from_group(basename, records)?;
        candidate.current_version = self.target_versions.get(basename).cloned();
        candidate.use_alternate_source = self.policy.alternate_source.contains(basename);
        Some(candidate)
    }

    /// Run the full reconciliation, including missing dependency pull-in
    pub fn reconcile(&self) -> Reconciliation {
        let policy = self.policy;
        let force_set: BTreeSet<&str> = policy.force_list.iter().map(String::as_str).collect();
        let mut matched_forced: BTreeSet<&str> = BTreeSet::new();
        let mut result = Reconciliation::default();

        for (basename, names) in &self.reference_groups {
            let records = self.group_records(basename);
            let Some(first) = records.first() else {
                continue;
            };

            if let Some(repo) = policy.rebuild_repo {
                if first.repo != repo {
                    continue;
                }
            }

            let forced_by: Vec<&str> = std::iter::once(basename.as_str())
                .chain(names.iter().map(String::as_str))
                .filter(|n| force_set.contains(n))
                .collect();
            let forced = !forced_by.is_empty();
            matched_forced.extend(forced_by);

            let current = self.target_versions.get(basename);
            let missing = self.missing_in_target(basename);

            if let Some(hit) = policy
                .blacklist
                .match_group(basename, names.iter().map(String::as_str))
            {
                let reason = SkipReason::Blacklisted {
                    pattern: hit.pattern,
                    name: hit.name,
                };
                debug!("Skipping {}: {}", basename, reason);
                if policy.missing_only && missing {
                    result.skipped_missing.push(basename.clone());
                }
                if forced {
                    if let Some(mut candidate) = self.candidate(basename, &records) {
                        candidate.skip = true;
                        candidate.skip_reason = Some(reason.to_string());
                        result.candidates.push(candidate);
                    }
                }
                result.skipped.push(SkipRecord {
                    basename: basename.clone(),
                    reason,
                });
                continue;
            }

            if is_toolchain(basename) && !forced {
                let stale = current.is_none_or(|v| is_version_newer(v, &first.version));
                if stale {
                    warn!("Toolchain package {} is outdated, use the bootstrap", basename);
                    result.advisories.push(Advisory::StaleToolchain {
                        basename: basename.clone(),
                        reference_version: first.version.clone(),
                        target_version: current.cloned(),
                    });
                }
                result.skipped.push(SkipRecord {
                    basename: basename.clone(),
                    reason: SkipReason::Toolchain,
                });
                continue;
            }

            let include = if policy.rebuild_repo.is_some() {
                true
            } else if !force_set.is_empty() {
                forced
            } else if policy.missing_only {
                missing && !self.depends_on_blacklisted(basename, &records, &mut result)
            } else if let Some(current) = current {
                match try_compare_versions(current, &first.version) {
                    Ok(ord) => ord == Ordering::Less,
                    Err(e) => {
                        warn!(
                            "Excluding {}: cannot compare {} with {}: {}",
                            basename, first.version, current, e
                        );
                        result.skipped.push(SkipRecord {
                            basename: basename.clone(),
                            reason: SkipReason::UnparseableVersion {
                                reference: first.version.clone(),
                                target: current.clone(),
                            },
                        });
                        false
                    }
                }
            } else {
                self.check_binary_provider(basename, first, &mut result.advisories);
                false
            };

            if include {
                if let Some(mut candidate) = self.candidate(basename, &records) {
                    candidate.force_latest = forced && policy.use_latest_revision;
                    result.candidates.push(candidate);
                }
            }
        }

        for name in &policy.force_list {
            if !matched_forced.contains(name.as_str()) {
                self.force_unmatched(name, &mut result);
            }
        }

        let pulled = self.pull_missing_dependencies(&mut result.candidates, &mut result.advisories);

        info!(
            "Reconciled {} reference basenames: {} candidates ({} pulled in), {} skipped",
            self.reference_groups.len(),
            result.candidates.len(),
            pulled,
            result.skipped.len()
        );
        result
    }

    /// Missing-only mode refuses packages that need blacklisted names
    fn depends_on_blacklisted(
        &self,
        basename: &str,
        records: &[&PackageRecord],
        result: &mut Reconciliation,
    ) -> bool {
        let blocked = records
            .iter()
            .flat_map(|r| r.depends.iter().chain(r.makedepends.iter()))
            .find(|d| self.policy.blacklist.is_blacklisted(&d.name));

        match blocked {
            Some(dep) => {
                debug!("Skipping {}: depends on blacklisted {}", basename, dep.name);
                result.skipped.push(SkipRecord {
                    basename: basename.to_string(),
                    reason: SkipReason::DependsOnBlacklisted {
                        dependency: dep.name.clone(),
                    },
                });
                true
            }
            None => false,
        }
    }

    fn check_binary_provider(
        &self,
        basename: &str,
        record: &PackageRecord,
        advisories: &mut Vec<Advisory>,
    ) {
        if let Some((provider, version)) = self.bin_providers.get(basename) {
            let advisory = Advisory::BinaryProvider {
                basename: basename.to_string(),
                provider: provider.clone(),
                provided_version: version.clone(),
                reference_version: record.version.clone(),
            };
            info!("{}", advisory);
            advisories.push(advisory);
        }
    }

    /// Forced names that are neither a basename nor a split package
    fn force_unmatched(&self, name: &str, result: &mut Reconciliation) {
        let Some(any_record) = self.reference.get_any(name) else {
            warn!("Forced package {} is not in the reference repositories", name);
            result.skipped.push(SkipRecord {
                basename: name.to_string(),
                reason: SkipReason::NotInReference,
            });
            return;
        };

        if !self.policy.include_any {
            info!("Forced package {} is architecture independent, skipping", name);
            result.skipped.push(SkipRecord {
                basename: any_record.basename.clone(),
                reason: SkipReason::ArchitectureIndependent,
            });
            return;
        }

        let basename = any_record.basename.clone();
        if result.candidates.iter().any(|c| c.basename == basename) {
            return;
        }
        let records: Vec<&PackageRecord> = self
            .reference
            .iter_any()
            .filter(|r| r.basename == basename)
            .collect();
        if let Some(mut candidate) = self.candidate(&basename, &records) {
            candidate.force_latest = self.policy.use_latest_revision;
            result.candidates.push(candidate);
        }
    }

    /// Append reference basenames needed by candidates but absent from target
    ///
    /// Runs to a fixpoint, so dependencies of pulled-in packages are checked
    /// too. Returns the number of candidates added.
    pub fn pull_missing_dependencies(
        &self,
        candidates: &mut Vec<CandidatePackage>,
        advisories: &mut Vec<Advisory>,
    ) -> usize {
        let mut queued: BTreeSet<String> = candidates.iter().map(|c| c.basename.clone()).collect();
        let before = candidates.len();
        let mut cursor = 0;

        while cursor < candidates.len() {
            if candidates[cursor].skip {
                cursor += 1;
                continue;
            }
            let requester = candidates[cursor].basename.clone();
            let wanted: Vec<(String, &str)> = {
                let c = &candidates[cursor];
                let tagged = |deps: &[crate::version::DepSpec], kind: &'static str| {
                    deps.iter()
                        .map(|d| (d.name.clone(), kind))
                        .collect::<Vec<_>>()
                };
                let mut all = tagged(&c.depends, "depends");
                all.extend(tagged(&c.makedepends, "makedepends"));
                all.extend(tagged(&c.checkdepends, "checkdepends"));
                all
            };

            for (dep, kind) in wanted {
                if !self.missing_in_target(&dep) {
                    continue;
                }
                let Some(record) = self
                    .reference
                    .get(&dep)
                    .or_else(|| self.reference_provides.get(&dep).and_then(|p| self.reference.get(p)))
                else {
                    continue;
                };
                let basename = record.basename.clone();
                if queued.contains(&basename) {
                    continue;
                }
                if self.policy.blacklist.is_blacklisted(&dep)
                    || self.policy.blacklist.is_blacklisted(&basename)
                {
                    debug!("Not pulling in blacklisted {} for {}", dep, requester);
                    continue;
                }
                queued.insert(basename.clone());

                if is_toolchain(&basename) {
                    warn!("{} needs toolchain package {}", requester, dep);
                    advisories.push(Advisory::MissingToolchainDependency {
                        dependency: dep,
                        required_by: requester.clone(),
                    });
                    continue;
                }

                let records = self.group_records(&basename);
                if let Some(mut candidate) = self.candidate(&basename, &records) {
                    info!("Adding {} ({} for {})", basename, kind, requester);
                    candidate.added_reason = Some(format!("{} for {}", kind, requester));
                    candidates.push(candidate);
                }
            }
            cursor += 1;
        }

        candidates.len() - before
    }
}

/// Convenience wrapper around [`Reconciler`]
pub fn reconcile(
    reference: &PackageUniverse,
    target: &PackageUniverse,
    policy: &ReconcilePolicy,
) -> Reconciliation {
    Reconciler::new(reference, target, policy).reconcile()
}
