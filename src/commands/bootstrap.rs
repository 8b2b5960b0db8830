// src/commands/bootstrap.rs

//! The `bootstrap` command

use super::{acquire_lock, devtools_executor};
use anyhow::{Context, Result};
use archport::bootstrap::ToolchainBootstrap;
use archport::cancel::CancellationToken;
use archport::config::Config;
use archport::ledger::{BOOTSTRAP_LEDGER, ProgressLedger};
use archport::progress::LogProgress;
use archport::sandbox::{REQUIRED_TOOLS, check_required_tools};
use archport::source::{GitSource, SourceFetcher};

/// Options for `archport bootstrap`
#[derive(Debug, Clone, Default)]
pub struct BootstrapCmdOptions {
    pub resume: bool,
    pub no_fetch: bool,
    pub no_upload: bool,
    pub preserve: bool,
}

pub fn cmd_bootstrap(
    config: &Config,
    opts: BootstrapCmdOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    let steps = config.bootstrap.sequence();
    println!(
        "Toolchain bootstrap: {} steps ({} in stage 1, {} in stage 2)",
        steps.len(),
        config.bootstrap.stage1.len(),
        config.bootstrap.stage2.len()
    );

    check_required_tools(&REQUIRED_TOOLS).context("Missing build tools")?;
    let _lock = acquire_lock(config)?;

    let mut exec_options = config.executor_options();
    exec_options.no_upload |= opts.no_upload;
    exec_options.preserve_failed |= opts.preserve;
    let executor = devtools_executor(config, exec_options, cancel);

    let ledger = ProgressLedger::new(config.paths.state_dir.join(BOOTSTRAP_LEDGER));
    let progress = LogProgress::new("bootstrap");
    let bootstrap = ToolchainBootstrap::new(
        &executor,
        ledger,
        config.bootstrap.clone(),
        config.paths.pkgbuilds_dir.clone(),
        &progress,
    );

    let git = GitSource::new(cancel.clone());
    let fetcher: Option<&dyn SourceFetcher> = if opts.no_fetch { None } else { Some(&git) };
    bootstrap
        .check_sources(fetcher)
        .context("Toolchain sources are incomplete")?;

    let report = bootstrap.run(opts.resume)?;

    println!();
    if report.resumed_from > 0 {
        println!("Resumed at step {}/{}", report.resumed_from + 1, report.total);
    }
    println!("Built {} steps: {}", report.built.len(), report.built.join(", "));

    match report.failed {
        None => {
            println!("Toolchain bootstrap completed.");
            Ok(())
        }
        Some(outcome) => {
            println!(
                "[FAILED] {}: {}",
                outcome.package,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
            if let Some(log) = &outcome.log_path {
                println!("  log: {}", log.display());
            }
            if let Some(path) = &outcome.preserved {
                println!("  sandbox: {}", path.display());
            }
            println!("Fix the failure and run 'archport bootstrap --continue'.");
            Err(anyhow::anyhow!("Bootstrap halted at {}", outcome.package))
        }
    }
}
