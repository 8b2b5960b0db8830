// src/commands/build.rs

//! The `build` command

use super::{acquire_lock, devtools_executor};
use anyhow::{Context, Result};
use archport::batch::{BatchOptions, BatchRunner};
use archport::blacklist::Blacklist;
use archport::cancel::CancellationToken;
use archport::config::Config;
use archport::ledger::{BATCH_LEDGER, ProgressLedger};
use archport::plan::BuildPlan;
use archport::progress::LogProgress;
use archport::sandbox::{REQUIRED_TOOLS, check_required_tools};
use std::path::PathBuf;
use tracing::info;

/// Options for `archport build`
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub plan: PathBuf,
    pub dry_run: bool,
    pub resume: bool,
    pub stop_on_failure: bool,
    pub preserve: bool,
    pub no_cache: bool,
    pub no_upload: bool,
    pub retry_file: PathBuf,
    pub blacklist: Option<PathBuf>,
}

pub fn cmd_build(config: &Config, opts: BuildOptions, cancel: &CancellationToken) -> Result<()> {
    let plan = BuildPlan::load(&opts.plan)
        .with_context(|| format!("Failed to load plan {}", opts.plan.display()))?;
    info!(
        "Loaded {} packages from {} ({})",
        plan.packages.len(),
        opts.plan.display(),
        plan.timestamp.format("%Y-%m-%d %H:%M:%S")
    );

    let blacklist_path = opts.blacklist.clone().unwrap_or_else(|| config.paths.blacklist.clone());
    let blacklist = Blacklist::load(&blacklist_path)
        .with_context(|| format!("Failed to read blacklist {}", blacklist_path.display()))?;

    let stop_on_failure = opts.stop_on_failure || config.build.stop_on_failure;
    let mut exec_options = config.executor_options();
    exec_options.no_upload |= opts.no_upload;
    exec_options.clear_cache = opts.no_cache;
    // A stopped batch leaves the failing sandbox for inspection
    exec_options.preserve_failed |= opts.preserve || stop_on_failure;

    let executor = devtools_executor(config, exec_options, cancel);
    let ledger = ProgressLedger::new(config.paths.state_dir.join(BATCH_LEDGER));
    let batch_options = BatchOptions {
        pkgbuilds_dir: config.paths.pkgbuilds_dir.clone(),
        blacklist,
        resume: opts.resume,
        stop_on_failure,
        retry_path: opts.retry_file.clone(),
    };
    let progress = LogProgress::new("build");
    let runner = BatchRunner::new(&executor, ledger, batch_options, &progress);

    if opts.dry_run {
        let queue = runner.queue(&plan)?;
        println!("Dry run, nothing will be built.");
        if queue.start > 0 {
            println!("Skipping {} already built packages", queue.start);
        }
        println!("Would build {} packages:", queue.pending().len());
        for (i, queued) in queue.pending().iter().enumerate() {
            let candidate = &queued.candidate;
            println!(
                "  {:>4}. [stage {}] {} {} -> {}",
                queue.start + i + 1,
                candidate.build_stage,
                candidate.name,
                candidate.current_version.as_deref().unwrap_or("(new)"),
                candidate.version
            );
        }
        if !queue.filtered.is_empty() {
            println!("Filtered: {}", queue.filtered.join(", "));
        }
        return Ok(());
    }

    check_required_tools(&REQUIRED_TOOLS).context("Missing build tools")?;
    let _lock = acquire_lock(config)?;

    let report = runner.run(&plan)?;

    println!();
    println!("Build summary:");
    if report.resumed_from > 0 {
        println!("  Resumed after {} packages", report.resumed_from);
    }
    println!("  Succeeded: {}", report.succeeded.len());
    println!("  Failed: {}", report.failed.len());
    if !report.filtered.is_empty() {
        println!("  Filtered: {}", report.filtered.len());
    }
    for outcome in &report.failed {
        println!(
            "  [FAILED] {}: {}",
            outcome.package,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
        if let Some(log) = &outcome.log_path {
            println!("           log: {}", log.display());
        }
        if let Some(path) = &outcome.preserved {
            println!("           sandbox: {}", path.display());
        }
    }
    if let Some(retry) = &report.retry_file {
        println!("Failed packages written to {}", retry.display());
        println!("Retry with 'archport build {}'", retry.display());
    }

    if report.is_success() {
        Ok(())
    } else {
        Err(anyhow::anyhow!("{} packages failed", report.failed.len()))
    }
}
