// src/blacklist.rs

//! Blacklist patterns and package name validation
//!
//! The blacklist is a newline-delimited list of glob patterns (`#` starts a
//! comment). A basename is blacklisted when the basename itself or any of
//! its split package names matches a pattern.
//!
//! Package names reach the filesystem and external commands, so every name
//! coming from a plan file or the command line goes through
//! [`validate_package_name`] first.

use crate::error::{Error, Result};
use glob::Pattern;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

static PACKAGE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9+._-]*$").expect("package name pattern is valid")
});

/// Accept only names safe to use as a path component and command argument
pub fn validate_package_name(name: &str) -> bool {
    PACKAGE_NAME.is_match(name)
}

/// Validate a name and join it onto `root`
pub fn package_dir(root: impl AsRef<Path>, name: &str) -> Result<PathBuf> {
    let root = root.as_ref();
    if !validate_package_name(name) {
        return Err(Error::InvalidPackageName(name.to_string()));
    }
    if name == "." || name == ".." {
        return Err(Error::PathTraversal(name.to_string()));
    }

    let joined = root.join(name);
    if let (Ok(canonical_root), Ok(canonical_joined)) = (root.canonicalize(), joined.canonicalize())
    {
        if !canonical_joined.starts_with(&canonical_root) {
            return Err(Error::PathTraversal(format!(
                "{} escapes {}",
                joined.display(),
                root.display()
            )));
        }
    }
    Ok(joined)
}

/// Which pattern matched which name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlacklistMatch {
    pub pattern: String,
    pub name: String,
}

/// Compiled blacklist
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    patterns: Vec<(String, Pattern)>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse blacklist text, skipping blank lines, comments and bad globs
    pub fn parse(content: &str) -> Self {
        let mut patterns = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match Pattern::new(line) {
                Ok(pattern) => patterns.push((line.to_string(), pattern)),
                Err(e) => warn!("Ignoring invalid blacklist pattern '{}': {}", line, e),
            }
        }
        Self { patterns }
    }

    /// Load a blacklist file; a missing file is an empty blacklist
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No blacklist at {}", path.display());
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)?;
        let blacklist = Self::parse(&content);
        debug!(
            "Loaded {} blacklist patterns from {}",
            blacklist.len(),
            path.display()
        );
        Ok(blacklist)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// First pattern matching a single name
    pub fn matches(&self, name: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|(_, pattern)| pattern.matches(name))
            .map(|(text, _)| text.as_str())
    }

    pub fn is_blacklisted(&self, name: &str) -> bool {
        self.matches(name).is_some()
    }

    /// Check a basename and then each of its split package names
    pub fn match_group<'a, I>(&self, basename: &'a str, names: I) -> Option<BlacklistMatch>
    where
        I: IntoIterator<Item = &'a str>,
    {
        std::iter::once(basename)
            .chain(names)
            .find_map(|name| {
                self.matches(name).map(|pattern| BlacklistMatch {
                    pattern: pattern.to_string(),
                    name: name.to_string(),
                })
            })
    }
}
