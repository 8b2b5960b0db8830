// src/main.rs

mod cli;
mod commands;

use anyhow::{Context, Result};
use archport::cancel::{CancellationToken, install_signal_handler};
use archport::config::Config;
use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    // Read-only queries keep the default interrupt behaviour
    let cancel = CancellationToken::new();
    if matches!(
        cli.command,
        Commands::Plan { .. } | Commands::Build { .. } | Commands::Bootstrap { .. }
    ) {
        install_signal_handler(&cancel)?;
    }

    match cli.command {
        Commands::Plan {
            packages,
            missing,
            rebuild_repo,
            use_latest,
            aur,
            include_any,
            preserve_order,
            no_fetch,
            blacklist,
            output,
        } => commands::cmd_plan(
            &config,
            commands::PlanOptions {
                packages,
                missing,
                rebuild_repo,
                use_latest,
                aur,
                include_any,
                preserve_order,
                no_fetch,
                blacklist,
                output,
            },
            &cancel,
        ),
        Commands::Build {
            plan,
            dry_run,
            resume,
            stop_on_failure,
            preserve,
            no_cache,
            no_upload,
            retry_file,
            blacklist,
        } => commands::cmd_build(
            &config,
            commands::BuildOptions {
                plan,
                dry_run,
                resume,
                stop_on_failure,
                preserve,
                no_cache,
                no_upload,
                retry_file,
                blacklist,
            },
            &cancel,
        ),
        Commands::Bootstrap {
            resume,
            no_fetch,
            no_upload,
            preserve,
        } => commands::cmd_bootstrap(
            &config,
            commands::BootstrapCmdOptions {
                resume,
                no_fetch,
                no_upload,
                preserve,
            },
            &cancel,
        ),
        Commands::Analyze => commands::cmd_analyze(&config),
        Commands::Dependents { package, target } => {
            commands::cmd_dependents(&config, &package, target)
        }
    }
}
