// src/reconcile/analyze.rs

//! Cross-architecture repository report
//!
//! Lists basenames that moved between repositories, basenames where the
//! target is ahead of the reference, and basenames only the target has.

use crate::index::{PackageUniverse, Repo};
use crate::version::is_version_newer;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoMismatch {
    pub basename: String,
    pub reference: Repo,
    pub target: Repo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSkew {
    pub basename: String,
    pub reference_version: String,
    pub target_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoAnalysis {
    pub repo_mismatches: Vec<RepoMismatch>,
    pub target_newer: Vec<VersionSkew>,
    pub target_only: Vec<String>,
}

impl RepoAnalysis {
    pub fn is_clean(&self) -> bool {
        self.repo_mismatches.is_empty() && self.target_newer.is_empty() && self.target_only.is_empty()
    }
}

/// First record per basename: (repo, version)
fn by_basename(universe: &PackageUniverse) -> BTreeMap<&str, (Repo, &str)> {
    let mut map = BTreeMap::new();
    for record in universe.iter().chain(universe.iter_any()) {
        map.entry(record.basename.as_str())
            .or_insert((record.repo, record.version.as_str()));
    }
    map
}

pub fn analyze_repositories(reference: &PackageUniverse, target: &PackageUniverse) -> RepoAnalysis {
    let reference_bases = by_basename(reference);
    let reference_provides = reference.provides_map();
    let mut analysis = RepoAnalysis::default();

    for (basename, (target_repo, target_version)) in by_basename(target) {
        match reference_bases.get(basename) {
            Some((reference_repo, reference_version)) => {
                if *reference_repo != target_repo {
                    analysis.repo_mismatches.push(RepoMismatch {
                        basename: basename.to_string(),
                        reference: *reference_repo,
                        target: target_repo,
                    });
                }
                if is_version_newer(reference_version, target_version) {
                    analysis.target_newer.push(VersionSkew {
                        basename: basename.to_string(),
                        reference_version: reference_version.to_string(),
                        target_version: target_version.to_string(),
                    });
                }
            }
            None => {
                let provided = reference_provides.contains_key(basename)
                    || reference.get_any(basename).is_some();
                if !provided {
                    analysis.target_only.push(basename.to_string());
                }
            }
        }
    }

    analysis
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::PackageRecord;

    #[test]
    fn test_analyze() {
        let reference = PackageUniverse::from_records([
            PackageRecord::new("zlib", "1.3-1", Repo::Core),
            PackageRecord::new("vim", "9.1-1", Repo::Extra),
            PackageRecord::new("bash", "5.2-1", Repo::Core),
        ])
        .unwrap();
        let target = PackageUniverse::from_records([
            PackageRecord::new("zlib", "1.3-1", Repo::Extra),
            PackageRecord::new("vim", "9.2-1", Repo::Extra),
            PackageRecord::new("bash", "5.2-1", Repo::Core),
            PackageRecord::new("uboot-tools", "2024.10-1", Repo::Other),
        ])
        .unwrap();

        let analysis = analyze_repositories(&reference, &target);
        assert_eq!(analysis.repo_mismatches.len(), 1);
        assert_eq!(analysis.repo_mismatches[0].basename, "zlib");
        assert_eq!(analysis.target_newer[0].basename, "vim");
        assert_eq!(analysis.target_only, vec!["uboot-tools"]);
        assert!(!analysis.is_clean());
    }
}
