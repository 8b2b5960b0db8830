// src/cli.rs
//! CLI definitions for archport
//!
//! Commands:
//! - `plan` - Diff the repositories and write a build plan
//! - `build` - Build a plan in disposable sandboxes
//! - `bootstrap` - Two-stage toolchain rebuild
//! - `analyze` - Report repository inconsistencies
//! - `dependents` - Reverse dependency query
//!
//! Flags override the matching configuration values.

use archport::plan::{PLAN_FILE, RETRY_FILE};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "archport")]
#[command(author = "Archport Contributors")]
#[command(version)]
#[command(about = "Dependency-ordered porting planner and sandboxed builder for Arch Linux", long_about = None)]
pub struct Cli {
    /// Configuration file (default: ./archport.toml, then ~/.config/archport/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compute a dependency-ordered build plan
    Plan {
        /// Build exactly these basenames or package names
        packages: Vec<String>,

        /// Only packages missing from the target
        #[arg(long)]
        missing: bool,

        /// Rebuild every package of one repository (core, extra)
        #[arg(long, value_name = "REPO")]
        rebuild_repo: Option<String>,

        /// Build the listed packages from their newest source revision
        #[arg(long)]
        use_latest: bool,

        /// Fetch these basenames from the AUR
        #[arg(long = "aur", value_name = "BASENAME")]
        aur: Vec<String>,

        /// Allow listing architecture-independent packages
        #[arg(long)]
        include_any: bool,

        /// Build the listed packages in the order given
        #[arg(long)]
        preserve_order: bool,

        /// Do not clone or update sources; read existing checkouts only
        #[arg(long)]
        no_fetch: bool,

        /// Blacklist file
        #[arg(long)]
        blacklist: Option<PathBuf>,

        /// Plan file to write
        #[arg(short, long, default_value = PLAN_FILE)]
        output: PathBuf,
    },

    /// Build the packages of a plan
    Build {
        /// Plan file to build
        #[arg(default_value = PLAN_FILE)]
        plan: PathBuf,

        /// Show what would be built without touching the build root
        #[arg(long)]
        dry_run: bool,

        /// Continue after the last successfully built package
        #[arg(long = "continue")]
        resume: bool,

        /// Stop at the first failure and keep its sandbox
        #[arg(long)]
        stop_on_failure: bool,

        /// Keep the sandbox of failed builds for inspection
        #[arg(long)]
        preserve: bool,

        /// Empty the package cache before each build
        #[arg(long)]
        no_cache: bool,

        /// Build without uploading artifacts
        #[arg(long)]
        no_upload: bool,

        /// Where failed packages are written
        #[arg(long, default_value = RETRY_FILE)]
        retry_file: PathBuf,

        /// Blacklist file
        #[arg(long)]
        blacklist: Option<PathBuf>,
    },

    /// Rebuild the toolchain in two stages
    Bootstrap {
        /// Continue after the last completed step
        #[arg(long = "continue")]
        resume: bool,

        /// Do not clone missing checkouts
        #[arg(long)]
        no_fetch: bool,

        /// Build without uploading artifacts
        #[arg(long)]
        no_upload: bool,

        /// Keep the sandbox of the failing step
        #[arg(long)]
        preserve: bool,
    },

    /// Report repository inconsistencies between the architectures
    Analyze,

    /// List basenames that depend on a package
    Dependents {
        /// Package name
        package: String,

        /// Query the target repositories instead of the reference
        #[arg(long)]
        target: bool,
    },
}
