// src/recipe.rs

//! PKGBUILD reading
//!
//! Repository indexes carry run-time dependencies only as far as the binary
//! packages go; the checked-out PKGBUILD is the authority for
//! `makedepends` and `checkdepends`. This module pulls the dependency
//! arrays and the version fields out of a PKGBUILD without running bash:
//!
//! ```bash
//! pkgname=nano
//! pkgver=8.5
//! pkgrel=2
//! depends=('ncurses'
//!          'file')   # trailing comments are fine
//! makedepends=("gcc>=13" "${pkgname}-docs")
//! ```
//!
//! `$var` and `${var}` references to scalar assignments are expanded;
//! anything more elaborate is taken literally.

use crate::error::{Error, Result};
use crate::plan::CandidatePackage;
use crate::version::DepSpec;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info};

static SCALAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^([a-zA-Z_][a-zA-Z0-9_]*)=(?:"([^"]*)"|'([^']*)'|([^\s(#][^\s#]*))\s*(?:#.*)?$"#)
        .expect("Invalid scalar regex")
});

static VAR_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)\}|\$([a-zA-Z_][a-zA-Z0-9_]*)")
        .expect("Invalid variable regex")
});

static ARRAY_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]*)"|'([^']*)'|([^\s"']+)"#).expect("Invalid item regex"));

/// The parts of a PKGBUILD the planner cares about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pkgbuild {
    pub pkgbase: Option<String>,
    pub pkgnames: Vec<String>,
    pub pkgver: Option<String>,
    pub pkgrel: Option<String>,
    pub epoch: Option<String>,
    pub depends: Vec<String>,
    pub makedepends: Vec<String>,
    pub checkdepends: Vec<String>,
}

impl Pkgbuild {
    pub fn parse(content: &str) -> Self {
        let vars = extract_scalars(content);
        let get = |key: &str| vars.get(key).cloned().filter(|v| !v.is_empty());

        let mut pkgnames = extract_array(content, "pkgname", &vars).unwrap_or_default();
        if pkgnames.is_empty() {
            pkgnames.extend(get("pkgname"));
        }

        Self {
            pkgbase: get("pkgbase"),
            pkgnames,
            pkgver: get("pkgver"),
            pkgrel: get("pkgrel"),
            epoch: get("epoch"),
            depends: extract_array(content, "depends", &vars).unwrap_or_default(),
            makedepends: extract_array(content, "makedepends", &vars).unwrap_or_default(),
            checkdepends: extract_array(content, "checkdepends", &vars).unwrap_or_default(),
        }
    }

    /// Read `<dir>/PKGBUILD`
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join("PKGBUILD");
        let content = fs::read_to_string(&path)
            .map_err(|e| Error::NotFound(format!("{}: {}", path.display(), e)))?;
        Ok(Self::parse(&content))
    }

    /// Full `epoch:pkgver-pkgrel` version, if pkgver is known
    pub fn full_version(&self) -> Option<String> {
        let pkgver = self.pkgver.as_deref()?;
        let mut version = match self.epoch.as_deref() {
            Some(epoch) if epoch != "0" => format!("{}:{}", epoch, pkgver),
            _ => pkgver.to_string(),
        };
        if let Some(pkgrel) = &self.pkgrel {
            version.push('-');
            version.push_str(pkgrel);
        }
        Some(version)
    }
}

fn extract_scalars(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for line in content.lines() {
        let Some(caps) = SCALAR.captures(line.trim()) else {
            continue;
        };
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|m| m.as_str())
            .unwrap_or_default();
        vars.insert(caps[1].to_string(), value.to_string());
    }

    // Values may refer to earlier ones (pkgver=${_basever}.1)
    let snapshot = vars.clone();
    for value in vars.values_mut() {
        *value = expand(value, &snapshot);
    }
    vars
}

fn expand(text: &str, vars: &HashMap<String, String>) -> String {
    VAR_REF
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match vars.get(name) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Items of `name=( ... )`, which may span several lines
///
/// Returns `None` when the array is not assigned at all.
pub fn extract_array(
    content: &str,
    name: &str,
    vars: &HashMap<String, String>,
) -> Option<Vec<String>> {
    let opener = format!("{}=(", name);
    let mut lines = content.lines();
    let mut current = loop {
        let line = lines.next()?;
        if let Some(rest) = line.trim_start().strip_prefix(&opener) {
            break rest;
        }
    };

    // Comments are cut before looking for the closing paren
    let mut body = String::new();
    loop {
        let line = strip_comment(current);
        if let Some(end) = closing_paren(line) {
            body.push_str(&line[..end]);
            break;
        }
        body.push_str(line);
        body.push('\n');
        match lines.next() {
            Some(next) => current = next,
            None => break,
        }
    }

    let mut items = Vec::new();
    for line in body.lines() {
        for caps in ARRAY_ITEM.captures_iter(line) {
            let raw = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            let item = expand(raw, vars);
            if !item.is_empty() {
                items.push(item);
            }
        }
    }
    Some(items)
}

/// Position of the first `)` outside quotes
fn closing_paren(line: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in line.char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, ')') => return Some(i),
            _ => {}
        }
    }
    None
}

/// Cut a `#` comment that is not inside quotes
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    for (i, c) in line.char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '#') => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Replace a candidate's dependency lists with what its PKGBUILD declares
///
/// Provides stay as the index reported them. For candidates built from the
/// latest revision the version is re-read as well, since the checkout may
/// have moved past the indexed version.
pub fn enrich_candidate(candidate: &mut CandidatePackage, dir: impl AsRef<Path>) -> Result<()> {
    let pkgbuild = Pkgbuild::load(dir)?;

    let specs = |items: &[String]| -> Vec<DepSpec> { items.iter().map(|d| DepSpec::parse(d)).collect() };
    candidate.depends = specs(&pkgbuild.depends);
    candidate.makedepends = specs(&pkgbuild.makedepends);
    candidate.checkdepends = specs(&pkgbuild.checkdepends);
    debug!(
        "{}: {} depends, {} makedepends, {} checkdepends from PKGBUILD",
        candidate.name,
        candidate.depends.len(),
        candidate.makedepends.len(),
        candidate.checkdepends.len()
    );

    if candidate.force_latest {
        if let Some(version) = pkgbuild.full_version() {
            if version != candidate.version {
                info!(
                    "{}: latest revision is {} (index had {})",
                    candidate.name, version, candidate.version
                );
                candidate.version = version;
            }
        }
    }
    Ok(())
}
