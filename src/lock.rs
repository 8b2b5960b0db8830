// src/lock.rs

//! Single-instance build lock
//!
//! Only one batch or bootstrap may drive the build root at a time. The lock
//! is held with `flock(LOCK_EX)` on the lock file for the lifetime of the
//! [`BuildLock`]; the kernel releases it when the process exits, so a crashed
//! run never leaves a lock behind. The file content only identifies the
//! holder for diagnostics:
//!
//! ```text
//! PID:12345
//! STARTED:2026-10-17T12:00:00+02:00
//! ```
//!
//! A record naming a process that no longer exists is stale and is
//! overwritten on acquisition. Liveness is checked through a
//! [`ProcessProbe`] so tests can decide who is alive.
//!
//! # Example
//!
//! ```ignore
//! use archport::lock::BuildLock;
//!
//! let _lock = BuildLock::acquire(".archport/build.lock")?;
//! // ... run the batch ...
//! // Lock released on drop
//! ```

use crate::error::{Error, Result};
use chrono::Local;
use fs2::FileExt;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default lock file name inside the state directory
pub const LOCK_FILE: &str = "build.lock";

/// Answers whether a PID belongs to a running process
pub trait ProcessProbe {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Probe using `kill(pid, 0)`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    fn is_alive(&self, pid: u32) -> bool {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => true,
            // Exists but belongs to someone else
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

/// Parse the PID out of lock file content
pub fn parse_holder(content: &str) -> Option<u32> {
    content
        .lines()
        .find_map(|line| line.trim().strip_prefix("PID:"))
        .and_then(|pid| pid.trim().parse().ok())
}

/// Exclusive lock held for the lifetime of a batch
#[derive(Debug)]
pub struct BuildLock {
    /// Kept open to maintain the lock
    file: File,
    path: PathBuf,
}

impl BuildLock {
    /// Acquire the lock without blocking
    ///
    /// Fails with [`Error::LockHeld`] when another run holds it.
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::acquire_with(path, &SystemProbe)
    }

    /// Acquire the lock, judging a leftover record with `probe`
    pub fn acquire_with<P: AsRef<Path>>(path: P, probe: &dyn ProcessProbe) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // No truncation before the lock is ours: the holder's PID must survive
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                let holder = match Self::holder_pid(&path) {
                    Some(pid) => format!("process {}", pid),
                    None => "another process".to_string(),
                };
                debug!("Build lock {} already held by {}", path.display(), holder);
                return Err(Error::LockHeld { path, holder });
            }
            Err(e) => {
                return Err(Error::IoError(format!(
                    "Failed to lock {}: {}",
                    path.display(),
                    e
                )));
            }
        }

        if Self::is_stale(&path, probe) {
            info!(
                "Clearing stale build lock record in {}",
                path.display()
            );
        } else if let Some(previous) = Self::holder_pid(&path) {
            warn!(
                "Build lock {} names live process {} but was not locked, taking over",
                path.display(),
                previous
            );
        }
        file.set_len(0)?;
        write!(
            file,
            "PID:{}\nSTARTED:{}\n",
            std::process::id(),
            Local::now().to_rfc3339()
        )?;
        file.flush()?;

        info!("Acquired build lock at {}", path.display());
        Ok(Self { file, path })
    }

    /// PID recorded in the lock file, if any
    pub fn holder_pid<P: AsRef<Path>>(path: P) -> Option<u32> {
        fs::read_to_string(path)
            .ok()
            .and_then(|content| parse_holder(&content))
    }

    /// True if the lock file records a holder that is gone or unreadable
    ///
    /// An empty file is a released lock, not a stale one.
    pub fn is_stale<P: AsRef<Path>>(path: P, probe: &dyn ProcessProbe) -> bool {
        let Ok(content) = fs::read_to_string(path) else {
            return false;
        };
        if content.trim().is_empty() {
            return false;
        }
        match parse_holder(&content) {
            Some(pid) => !probe.is_alive(pid),
            None => true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        // Never unlinked while a waiter may hold it open
        if let Err(e) = self.file.set_len(0) {
            warn!("Failed to clear build lock {}: {}", self.path.display(), e);
        }
        match FileExt::unlock(&self.file) {
            Ok(()) => info!("Released build lock at {}", self.path.display()),
            Err(e) => warn!("Failed to unlock {}: {}", self.path.display(), e),
        }
    }
}
