// src/commands/mod.rs
//! Command handlers for the archport CLI

mod analyze;
mod bootstrap;
mod build;
mod plan;

pub use analyze::{cmd_analyze, cmd_dependents};
pub use bootstrap::{BootstrapCmdOptions, cmd_bootstrap};
pub use build::{BuildOptions, cmd_build};
pub use plan::{PlanOptions, cmd_plan};

use anyhow::{Context, Result};
use archport::cancel::CancellationToken;
use archport::config::Config;
use archport::lock::{BuildLock, LOCK_FILE};
use archport::sandbox::{BuildLogStore, DevtoolsHost, ExecutorOptions, SandboxExecutor};

/// Executor over the real devtools
fn devtools_executor(
    config: &Config,
    options: ExecutorOptions,
    cancel: &CancellationToken,
) -> SandboxExecutor<DevtoolsHost> {
    let logs = BuildLogStore::new(&config.paths.logs_dir, config.build.log_retention);
    SandboxExecutor::new(config.devtools_host(), options, logs, cancel.clone())
}

/// Take the single-instance lock in the state directory
fn acquire_lock(config: &Config) -> Result<BuildLock> {
    std::fs::create_dir_all(&config.paths.state_dir).with_context(|| {
        format!(
            "Failed to create state directory {}",
            config.paths.state_dir.display()
        )
    })?;
    let path = config.paths.state_dir.join(LOCK_FILE);
    BuildLock::acquire(&path).with_context(|| format!("Failed to acquire {}", path.display()))
}
