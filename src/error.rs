// src/error.rs

//! Error types for archport
//!
//! Every error carries an [`ErrorKind`] that tells the batch layer how to
//! react: integrity and input errors abort the run, per-package errors are
//! recorded and the batch moves on, advisory conditions are handled in place.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// How a failure propagates through planning and execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The environment or index data is inconsistent; abort immediately
    FatalIntegrity,
    /// Untrusted input was rejected before any sandbox work
    FatalInput,
    /// One package failed; recorded, the batch may continue
    PerPackage,
    /// Handled in place, logged at most
    Advisory,
    /// The operator interrupted the run
    Interrupted,
}

#[derive(Error, Debug)]
pub enum Error {
    /// The same basename is published in two repositories
    #[error("Basename '{basename}' appears in both '{first}' and '{second}'")]
    DuplicateBasename {
        basename: String,
        first: String,
        second: String,
    },

    /// Required host tool is missing
    #[error("Required tool not found: {0}")]
    ToolNotFound(String),

    /// A required checkout or file does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Package name failed validation
    #[error("Invalid package name: '{0}'")]
    InvalidPackageName(String),

    /// Joining a name onto a directory escaped the directory
    #[error("Path traversal attempt: {0}")]
    PathTraversal(String),

    /// Plan or retry file is malformed
    #[error("Invalid plan file {path}: {reason}")]
    InvalidPlan { path: PathBuf, reason: String },

    /// Repository index or recipe could not be parsed
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Configuration file problem
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Another process holds the build lock
    #[error("Build lock {path} is held by {holder}")]
    LockHeld { path: PathBuf, holder: String },

    /// Sandbox creation, dependency install or teardown failed
    #[error("Sandbox error: {0}")]
    SandboxError(String),

    /// The package build itself failed
    #[error("Build failed for {package} (exit code {exit_code})")]
    BuildFailed { package: String, exit_code: i32 },

    /// Uploading artifacts failed or produced nothing
    #[error("Upload failed for {package}: {reason}")]
    UploadFailed { package: String, reason: String },

    /// Checking out package sources failed
    #[error("Source checkout failed for {package}: {reason}")]
    SourceFetchFailed { package: String, reason: String },

    /// An external command could not be run
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// The run was interrupted by a signal
    #[error("Interrupted")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Classify this error for propagation decisions
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DuplicateBasename { .. } | Error::ToolNotFound(_) | Error::NotFound(_) => {
                ErrorKind::FatalIntegrity
            }
            Error::InvalidPackageName(_)
            | Error::PathTraversal(_)
            | Error::InvalidPlan { .. }
            | Error::ConfigError(_)
            | Error::LockHeld { .. } => ErrorKind::FatalInput,
            Error::SandboxError(_)
            | Error::BuildFailed { .. }
            | Error::UploadFailed { .. }
            | Error::SourceFetchFailed { .. }
            | Error::CommandFailed(_) => ErrorKind::PerPackage,
            Error::Cancelled => ErrorKind::Interrupted,
            Error::ParseError(_) | Error::Io(_) | Error::IoError(_) | Error::Json(_) => {
                ErrorKind::FatalIntegrity
            }
        }
    }

    /// True when the whole run must stop
    pub fn is_fatal(&self) -> bool {
        !matches!(self.kind(), ErrorKind::PerPackage | ErrorKind::Advisory)
    }
}
