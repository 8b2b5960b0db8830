// src/lib.rs

//! Archport
//!
//! Plans and executes the port of an Arch Linux package set from a
//! reference architecture to a secondary one.
//!
//! # Architecture
//!
//! - Reconciliation: diff the reference and target universes, apply the
//!   selection policy, pull in missing dependencies
//! - Scheduling: order candidates into dependency stages, tolerating cycles
//! - Execution: one disposable sandbox per package, torn down on every
//!   path, with retained failure logs and a resumable progress ledger
//! - Bootstrap: the two-stage toolchain rebuild that normal batches skip

pub mod batch;
pub mod blacklist;
pub mod bootstrap;
pub mod cancel;
pub mod config;
mod error;
pub mod index;
pub mod ledger;
pub mod lock;
pub mod plan;
pub mod progress;
pub mod recipe;
pub mod reconcile;
pub mod sandbox;
pub mod schedule;
pub mod source;
pub mod version;

pub use batch::{BatchOptions, BatchReport, BatchRunner};
pub use blacklist::{Blacklist, package_dir, validate_package_name};
pub use bootstrap::{BootstrapOptions, BootstrapReport, ToolchainBootstrap};
pub use cancel::CancellationToken;
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use index::{PackageRecord, PackageUniverse, Repo};
pub use ledger::{ProgressLedger, ProgressMarker};
pub use lock::BuildLock;
pub use plan::{BuildPlan, CandidatePackage};
pub use progress::{LogProgress, PackageStatus, ProgressTracker, SilentProgress};
pub use reconcile::{ReconcilePolicy, Reconciliation, Reconciler, reconcile};
pub use sandbox::{BuildHost, DevtoolsHost, ExecutorOptions, PackageOutcome, SandboxExecutor};
pub use schedule::{Schedule, preserve_order, schedule};
pub use version::{DepSpec, compare_versions, is_version_newer};
