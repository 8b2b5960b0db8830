// src/index/archive.rs

//! Arch repository database reader
//!
//! A repository database (`core.db`, `extra.db.tar.zst`, ...) is a tar
//! archive with one directory per package holding a `desc` file. Each
//! `desc` file is a list of `%KEY%` sections followed by one value per line.

use super::{PackageRecord, Repo};
use crate::error::{Error, Result};
use crate::version::DepSpec;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tar::Archive;
use tracing::{debug, info, warn};

/// Compression wrapped around a database tarball
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbCompression {
    Plain,
    Gzip,
    Xz,
    Zstd,
}

impl DbCompression {
    /// Identify the compression from the leading bytes of the file
    pub fn sniff(head: &[u8]) -> Self {
        match head {
            [0x1f, 0x8b, ..] => Self::Gzip,
            [0xfd, b'7', b'z', b'X', b'Z', 0x00, ..] => Self::Xz,
            [0x28, 0xb5, 0x2f, 0xfd, ..] => Self::Zstd,
            _ => Self::Plain,
        }
    }
}

/// Open a database file and return a reader over the raw tar stream
fn open_tar_stream(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).map_err(|e| {
        Error::IoError(format!("Failed to open repository database {}: {}", path.display(), e))
    })?;
    let mut reader = BufReader::new(file);
    let compression = DbCompression::sniff(reader.fill_buf()?);
    debug!("{} is {:?}", path.display(), compression);

    Ok(match compression {
        DbCompression::Plain => Box::new(reader),
        DbCompression::Gzip => Box::new(flate2::read::GzDecoder::new(reader)),
        DbCompression::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
        DbCompression::Zstd => Box::new(zstd::Decoder::with_buffer(reader).map_err(|e| {
            Error::ParseError(format!("Failed to create zstd decoder: {}", e))
        })?),
    })
}

/// Load every package record from a repository database
pub fn load_repo_db(path: impl AsRef<Path>, repo: Repo) -> Result<Vec<PackageRecord>> {
    let path = path.as_ref();
    let records = read_repo_db(open_tar_stream(path)?, repo)?;
    info!(
        "Loaded {} packages from {} ({})",
        records.len(),
        path.display(),
        repo
    );
    Ok(records)
}

/// Parse records out of an uncompressed tar stream
pub fn read_repo_db<R: Read>(reader: R, repo: Repo) -> Result<Vec<PackageRecord>> {
    let mut archive = Archive::new(reader);
    let mut records = Vec::new();

    let entries = archive
        .entries()
        .map_err(|e| Error::ParseError(format!("Failed to read database archive: {}", e)))?;

    for entry in entries {
        let mut entry = entry
            .map_err(|e| Error::ParseError(format!("Corrupt database entry: {}", e)))?;
        let is_desc = entry
            .path()
            .map(|p| p.file_name().is_some_and(|n| n == "desc"))
            .unwrap_or(false);
        if !is_desc {
            continue;
        }

        let mut content = String::new();
        entry.read_to_string(&mut content)?;
        match parse_desc(&content, repo) {
            Some(record) => records.push(record),
            None => {
                let location = entry
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                warn!("Skipping {}: missing %NAME% or %VERSION%", location);
            }
        }
    }

    Ok(records)
}

/// Parse a `desc` file; `None` when NAME or VERSION is missing
pub fn parse_desc(content: &str, repo: Repo) -> Option<PackageRecord> {
    let mut name = None;
    let mut base = None;
    let mut version = None;
    let mut arch = None;
    let mut depends = Vec::new();
    let mut makedepends = Vec::new();
    let mut checkdepends = Vec::new();
    let mut provides = Vec::new();

    let mut section: Option<&str> = None;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            section = None;
            continue;
        }
        if line.len() > 2 && line.starts_with('%') && line.ends_with('%') {
            section = Some(&line[1..line.len() - 1]);
            continue;
        }

        match section {
            Some("NAME") => name = Some(line.to_string()),
            Some("BASE") => base = Some(line.to_string()),
            Some("VERSION") => version = Some(line.to_string()),
            Some("ARCH") => arch = Some(line.to_string()),
            Some("DEPENDS") => depends.push(DepSpec::parse(line)),
            Some("MAKEDEPENDS") => makedepends.push(DepSpec::parse(line)),
            Some("CHECKDEPENDS") => checkdepends.push(DepSpec::parse(line)),
            Some("PROVIDES") => provides.push(DepSpec::parse(line)),
            _ => {}
        }
    }

    let name = name?;
    let version = version?;
    Some(PackageRecord {
        basename: base.unwrap_or_else(|| name.clone()),
        name,
        version,
        repo,
        arch,
        depends,
        makedepends,
        checkdepends,
        provides,
    })
}
