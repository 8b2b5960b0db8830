// src/commands/analyze.rs

//! Repository inspection commands: `analyze` and `dependents`

use anyhow::{Context, Result};
use archport::config::Config;
use archport::reconcile::analyze_repositories;

/// Report repository mismatches, target-newer versions and target-only packages
pub fn cmd_analyze(config: &Config) -> Result<()> {
    let reference = config
        .load_reference()
        .context("Failed to load reference repositories")?;
    let target = config
        .load_target()
        .context("Failed to load target repositories")?;

    let analysis = analyze_repositories(&reference, &target);
    if analysis.is_clean() {
        println!("No inconsistencies between the repositories.");
        return Ok(());
    }

    if !analysis.repo_mismatches.is_empty() {
        println!("Repository mismatches ({}):", analysis.repo_mismatches.len());
        for m in &analysis.repo_mismatches {
            println!(
                "  {}: {} in {}, {} in {}",
                m.basename,
                m.reference,
                config.repos.reference_arch,
                m.target,
                config.repos.target_arch
            );
        }
    }

    if !analysis.target_newer.is_empty() {
        println!(
            "Newer in {} ({}):",
            config.repos.target_arch,
            analysis.target_newer.len()
        );
        for skew in &analysis.target_newer {
            println!(
                "  {}: {} > {}",
                skew.basename, skew.target_version, skew.reference_version
            );
        }
    }

    if !analysis.target_only.is_empty() {
        println!(
            "Only in {} ({}):",
            config.repos.target_arch,
            analysis.target_only.len()
        );
        for name in &analysis.target_only {
            println!("  {}", name);
        }
    }

    Ok(())
}

/// List basenames whose depends or makedepends name `package`
pub fn cmd_dependents(config: &Config, package: &str, target: bool) -> Result<()> {
    let universe = if target {
        config.load_target()
    } else {
        config.load_reference()
    }
    .context("Failed to load repositories")?;

    let dependents = universe.dependents(package);
    if dependents.is_empty() {
        println!("Nothing depends on {}", package);
        return Ok(());
    }

    println!("Packages depending on {} ({}):", package, dependents.len());
    for name in &dependents {
        println!("  {}", name);
    }
    Ok(())
}
