// src/source.rs

//! Package source checkouts
//!
//! Each basename is checked out into `<pkgbuilds>/<basename>` from the
//! distribution's packaging group or, for basenames marked as alternate,
//! from the user-submission repository. A checkout is pinned to the tag of
//! the planned version; when no tag matches, or the candidate asked for the
//! latest revision, the default branch is used.

use crate::blacklist::package_dir;
use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::plan::CandidatePackage;
use crate::recipe::enrich_candidate;
use crate::sandbox::stream::run_quiet;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info, warn};

/// Packaging group of the reference distribution
pub const PRIMARY_SOURCE_BASE: &str = "https://gitlab.archlinux.org/archlinux/packaging/packages";

/// User-submitted package repository
pub const ALTERNATE_SOURCE_BASE: &str = "https://aur.archlinux.org";

/// Clone URL in the packaging group (`++` is spelled `plusplus` there)
pub fn primary_url(basename: &str) -> String {
    format!(
        "{}/{}.git",
        PRIMARY_SOURCE_BASE,
        basename.replace("++", "plusplus")
    )
}

pub fn alternate_url(basename: &str) -> String {
    format!("{}/{}.git", ALTERNATE_SOURCE_BASE, basename)
}

/// Tags to try for a version, in order
pub fn tag_candidates(basename: &str, version: &str) -> Vec<String> {
    let git_version = version.replace(':', "-");
    let mut tags = vec![
        git_version.clone(),
        version.to_string(),
        format!("v{}", git_version),
        format!("{}-{}", basename, git_version),
    ];
    tags.dedup();
    tags
}

/// What a checkout ended up on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checkout {
    Tag(String),
    DefaultBranch,
}

pub trait SourceFetcher {
    /// Clone or update the sources for `candidate` into `dest`
    fn fetch(&self, candidate: &CandidatePackage, dest: &Path) -> Result<Checkout>;
}

/// `git`-backed fetcher
#[derive(Debug, Clone)]
pub struct GitSource {
    pub default_branch: String,
    cancel: CancellationToken,
}

impl GitSource {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            default_branch: "main".to_string(),
            cancel,
        }
    }

    fn git(&self, dir: Option<&Path>, args: &[&str]) -> Result<()> {
        let mut cmd = Command::new("git");
        cmd.args(args);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        let out = run_quiet(cmd, &self.cancel)?;
        if out.success() {
            Ok(())
        } else {
            Err(Error::CommandFailed(format!(
                "git {} exited with {}: {}",
                args.join(" "),
                out.exit_code,
                out.output.trim()
            )))
        }
    }

    fn reset_to_default(&self, dest: &Path) -> Result<()> {
        let remote = format!("origin/{}", self.default_branch);
        self.git(Some(dest), &["fetch", "origin"])?;
        self.git(Some(dest), &["checkout", "--force", &self.default_branch])?;
        self.git(Some(dest), &["reset", "--hard", &remote])
    }
}

impl SourceFetcher for GitSource {
    fn fetch(&self, candidate: &CandidatePackage, dest: &Path) -> Result<Checkout> {
        let basename = &candidate.basename;
        let wrap = |e: Error| match e {
            Error::Cancelled => Error::Cancelled,
            other => Error::SourceFetchFailed {
                package: basename.clone(),
                reason: other.to_string(),
            },
        };

        if dest.join(".git").is_dir() {
            debug!("Updating checkout {}", dest.display());
            self.git(Some(dest), &["fetch", "--tags", "origin"]).map_err(wrap)?;
        } else {
            let url = if candidate.use_alternate_source {
                alternate_url(basename)
            } else {
                primary_url(basename)
            };
            info!("Cloning {}", url);
            let dest_str = dest.to_string_lossy();
            self.git(None, &["clone", &url, &dest_str]).map_err(wrap)?;
        }

        if candidate.force_latest || candidate.use_alternate_source {
            self.reset_to_default(dest).map_err(wrap)?;
            return Ok(Checkout::DefaultBranch);
        }

        for tag in tag_candidates(basename, &candidate.version) {
            match self.git(Some(dest), &["checkout", "--force", &tag]) {
                Ok(()) => {
                    debug!("{} checked out at tag {}", basename, tag);
                    return Ok(Checkout::Tag(tag));
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(_) => continue,
            }
        }

        warn!(
            "No tag for {} {}, using latest {}",
            basename, candidate.version, self.default_branch
        );
        self.reset_to_default(dest).map_err(wrap)?;
        Ok(Checkout::DefaultBranch)
    }
}

/// Check out and read the sources of every buildable candidate
///
/// Skipped candidates are left alone. A failed checkout or an unreadable
/// PKGBUILD keeps the index data for that candidate and is reported back;
/// an interrupt or an invalid name stops the whole pass.
pub fn prepare_sources(
    candidates: &mut [CandidatePackage],
    root: &Path,
    fetcher: Option<&dyn SourceFetcher>,
    cancel: &CancellationToken,
) -> Result<Vec<(String, Error)>> {
    std::fs::create_dir_all(root)?;
    let mut problems = Vec::new();
    let total = candidates.iter().filter(|c| !c.skip).count();

    for (i, candidate) in candidates.iter_mut().filter(|c| !c.skip).enumerate() {
        cancel.check()?;
        let dir = package_dir(root, &candidate.basename)?;
        info!("[{}/{}] Processing {}", i + 1, total, candidate.name);

        if let Some(fetcher) = fetcher {
            match fetcher.fetch(candidate, &dir) {
                Ok(_) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!("{}", e);
                    problems.push((candidate.name.clone(), e));
                    continue;
                }
            }
        }

        if let Err(e) = enrich_candidate(candidate, &dir) {
            debug!("Keeping index dependencies for {}: {}", candidate.name, e);
            problems.push((candidate.name.clone(), e));
        }
    }
    Ok(problems)
}
