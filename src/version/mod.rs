// src/version/mod.rs

//! Version handling for Arch-style package versions
//!
//! Versions have the form `[epoch:]upstream[-release]`. Comparison looks at
//! the epoch first, then walks the upstream and release strings run by run:
//! digit runs compare as integers, everything else compares as text.
//!
//! [`compare_versions`] never fails. Strings that cannot be parsed into the
//! structured form fall back to comparing their numeric substrings, then the
//! raw strings. Callers that must treat unparseable input conservatively use
//! [`try_compare_versions`] instead.

mod spec;

pub use spec::{DepOp, DepSpec};

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;

/// A parsed package version
///
/// Equality follows the version ordering, so `1.007` equals `1.7`.
#[derive(Debug, Clone)]
pub struct PackageVersion {
    pub epoch: u64,
    pub upstream: String,
    pub release: Option<String>,
}

impl PackageVersion {
    /// Parse a version string
    ///
    /// Examples:
    /// - "1.2.3" → epoch=0, upstream="1.2.3", release=None
    /// - "2:1.2.3-1" → epoch=2, upstream="1.2.3", release=Some("1")
    /// - "1.0+r12-2" → epoch=0, upstream="1.0+r12", release=Some("2")
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (epoch, rest) = match s.split_once(':') {
            Some((e, r)) => {
                let epoch = e.parse::<u64>().map_err(|err| {
                    Error::ParseError(format!("Invalid epoch in version '{}': {}", s, err))
                })?;
                (epoch, r)
            }
            None => (0, s),
        };

        let (upstream, release) = match rest.rsplit_once('-') {
            Some((u, r)) if !r.is_empty() => (u, Some(r.to_string())),
            _ => (rest, None),
        };

        if upstream.is_empty() {
            return Err(Error::ParseError(format!(
                "Empty upstream version in '{}'",
                s
            )));
        }

        Ok(Self {
            epoch,
            upstream: upstream.to_string(),
            release,
        })
    }

    /// Compare two parsed versions
    pub fn compare(&self, other: &PackageVersion) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| compare_segments(&self.upstream, &other.upstream))
            .then_with(|| match (&self.release, &other.release) {
                (Some(a), Some(b)) => compare_segments(a, b),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.upstream)?;
        if let Some(release) = &self.release {
            write!(f, "-{}", release)?;
        }
        Ok(())
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PackageVersion {}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compare two version strings, falling back when they do not parse
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match try_compare_versions(a, b) {
        Ok(ord) => ord,
        Err(_) => fallback_compare(a, b),
    }
}

/// Compare two version strings as -1, 0 or 1
pub fn compare_versions_i32(a: &str, b: &str) -> i32 {
    match compare_versions(a, b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// Compare two version strings, failing if either does not parse
pub fn try_compare_versions(a: &str, b: &str) -> Result<Ordering> {
    let a = PackageVersion::parse(a)?;
    let b = PackageVersion::parse(b)?;
    Ok(a.compare(&b))
}

/// True when `candidate` is strictly newer than `current`
pub fn is_version_newer(current: &str, candidate: &str) -> bool {
    compare_versions(current, candidate) == Ordering::Less
}

/// A maximal run of digits or of non-digits
#[derive(Debug, PartialEq, Eq)]
enum Run<'a> {
    Numeric(&'a str),
    Text(&'a str),
}

fn runs(s: &str) -> Vec<Run<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut numeric = None;

    for (i, c) in s.char_indices() {
        let is_digit = c.is_ascii_digit();
        match numeric {
            Some(prev) if prev != is_digit => {
                out.push(make_run(&s[start..i], prev));
                start = i;
            }
            _ => {}
        }
        numeric = Some(is_digit);
    }
    if let Some(prev) = numeric {
        out.push(make_run(&s[start..], prev));
    }
    out
}

fn make_run(text: &str, numeric: bool) -> Run<'_> {
    if numeric {
        Run::Numeric(text)
    } else {
        Run::Text(text)
    }
}

/// Compare digit strings by value without parsing into a fixed width
fn compare_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn compare_segments(a: &str, b: &str) -> Ordering {
    let left = runs(a);
    let right = runs(b);

    for (x, y) in left.iter().zip(right.iter()) {
        let ord = match (x, y) {
            (Run::Numeric(x), Run::Numeric(y)) => compare_numeric(x, y),
            (Run::Text(x), Run::Text(y)) => x.cmp(y),
            // A number outranks a letter run at the same position
            (Run::Numeric(_), Run::Text(_)) => Ordering::Greater,
            (Run::Text(_), Run::Numeric(_)) => Ordering::Less,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    left.len().cmp(&right.len())
}

fn fallback_compare(a: &str, b: &str) -> Ordering {
    let numbers = |s: &str| -> Vec<String> {
        runs(s)
            .into_iter()
            .filter_map(|r| match r {
                Run::Numeric(n) => Some(n.to_string()),
                Run::Text(_) => None,
            })
            .collect()
    };

    let left = numbers(a);
    let right = numbers(b);
    for (x, y) in left.iter().zip(right.iter()) {
        let ord = compare_numeric(x, y);
        if ord != Ordering::Equal {
            return ord;
        }
    }

    a.cmp(b)
}
