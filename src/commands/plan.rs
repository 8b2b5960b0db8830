// src/commands/plan.rs

//! The `plan` command
//!
//! Reconciles the reference and target repositories, checks out and reads
//! the sources of every candidate, pulls in whatever the recipes added,
//! orders the result and writes the plan file.

use anyhow::{Context, Result};
use archport::blacklist::Blacklist;
use archport::cancel::CancellationToken;
use archport::config::Config;
use archport::index::Repo;
use archport::plan::BuildPlan;
use archport::reconcile::{Advisory, ReconcilePolicy, Reconciler};
use archport::schedule::{preserve_order, schedule};
use archport::source::{GitSource, SourceFetcher, prepare_sources};
use std::path::PathBuf;
use tracing::{info, warn};

/// Options for `archport plan`
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub packages: Vec<String>,
    pub missing: bool,
    pub rebuild_repo: Option<String>,
    pub use_latest: bool,
    pub aur: Vec<String>,
    pub include_any: bool,
    pub preserve_order: bool,
    pub no_fetch: bool,
    pub blacklist: Option<PathBuf>,
    pub output: PathBuf,
}

pub fn cmd_plan(config: &Config, opts: PlanOptions, cancel: &CancellationToken) -> Result<()> {
    let rebuild_repo = match opts.rebuild_repo.as_deref() {
        Some(name) => Some(
            name.parse::<Repo>()
                .ok()
                .filter(|r| *r != Repo::Other)
                .ok_or_else(|| anyhow::anyhow!("Unknown repository '{}' (core, extra)", name))?,
        ),
        None => None,
    };

    let blacklist_path = opts.blacklist.clone().unwrap_or_else(|| config.paths.blacklist.clone());
    let blacklist = Blacklist::load(&blacklist_path)
        .with_context(|| format!("Failed to read blacklist {}", blacklist_path.display()))?;

    let reference = config
        .load_reference()
        .context("Failed to load reference repositories")?;
    cancel.check()?;
    let target = config
        .load_target()
        .context("Failed to load target repositories")?;
    cancel.check()?;

    let mut policy = ReconcilePolicy::default()
        .with_force_list(opts.packages.clone())
        .with_blacklist(blacklist)
        .with_missing_only(opts.missing)
        .with_rebuild_repo(rebuild_repo);
    policy.use_latest_revision = opts.use_latest;
    policy.alternate_source = opts.aur.iter().cloned().collect();
    policy.include_any = opts.include_any;

    let reconciler = Reconciler::new(&reference, &target, &policy);
    let mut result = reconciler.reconcile();
    info!(
        "{} candidates, {} skipped",
        result.candidates.len(),
        result.skipped.len()
    );

    let git = GitSource::new(cancel.clone());
    let fetcher: Option<&dyn SourceFetcher> = if opts.no_fetch { None } else { Some(&git) };

    if !result.candidates.is_empty() {
        let problems = prepare_sources(
            &mut result.candidates,
            &config.paths.pkgbuilds_dir,
            fetcher,
            cancel,
        )?;
        report_source_problems(&problems, fetcher.is_some());

        // Recipes can name dependencies the index did not know about
        let before = result.candidates.len();
        let added =
            reconciler.pull_missing_dependencies(&mut result.candidates, &mut result.advisories);
        if added > 0 {
            info!("Recipes added {} more dependencies", added);
            let problems = prepare_sources(
                &mut result.candidates[before..],
                &config.paths.pkgbuilds_dir,
                fetcher,
                cancel,
            )?;
            report_source_problems(&problems, fetcher.is_some());
        }
    }

    let scheduled = if opts.preserve_order && !opts.packages.is_empty() {
        preserve_order(result.candidates, &opts.packages)
    } else {
        schedule(result.candidates)
    };

    let command = std::env::args().collect::<Vec<_>>().join(" ");
    let plan = BuildPlan::new(command, scheduled.packages);
    plan.save(&opts.output)
        .with_context(|| format!("Failed to write {}", opts.output.display()))?;

    if !result.skipped.is_empty() {
        println!("Skipped:");
        for record in &result.skipped {
            println!("  {}: {}", record.basename, record.reason);
        }
    }
    if !result.skipped_missing.is_empty() {
        println!(
            "Blacklisted and missing from target: {}",
            result.skipped_missing.join(", ")
        );
    }
    for cycle in &scheduled.cycles {
        println!("Cycle: {}", cycle.join(" <-> "));
    }

    let summary = plan.summary();
    println!("Plan written to {}", opts.output.display());
    println!(
        "  {} packages: {} upgrades, {} new, {} rebuilds, {} downgrades ({} pulled in as dependencies)",
        summary.total - summary.skipped,
        summary.upgrades,
        summary.new,
        summary.rebuilds,
        summary.downgrades,
        summary.pulled_in
    );
    if summary.skipped > 0 {
        println!("  {} listed but marked skip", summary.skipped);
    }
    for (stage, count) in &summary.stages {
        println!("  stage {}: {} packages", stage, count);
    }

    if !result.advisories.is_empty() {
        println!();
        for advisory in &result.advisories {
            println!("[WARN] {}", advisory);
        }
        if result
            .advisories
            .iter()
            .any(|a| matches!(a, Advisory::StaleToolchain { .. }))
        {
            println!("Run 'archport bootstrap' before building this plan.");
        }
    }

    Ok(())
}

fn report_source_problems(problems: &[(String, archport::Error)], fetched: bool) {
    if problems.is_empty() {
        return;
    }
    if fetched {
        warn!("{} packages have no usable sources", problems.len());
    }
    for (name, error) in problems {
        if fetched {
            println!("[WARN] {}: {}", name, error);
        } else {
            info!("{}: {}", name, error);
        }
    }
}
