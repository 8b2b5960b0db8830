// tests/planning.rs

//! Planning from repository databases through to the plan file

mod common;

use archport::Error;
use archport::config::{Config, RepoSource};
use archport::plan::BuildPlan;
use archport::reconcile::{Advisory, ReconcilePolicy, Reconciler, analyze_repositories};
use archport::schedule::schedule;
use common::{DbEntry, write_repo_db};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn source(name: &str, path: &Path) -> RepoSource {
    RepoSource {
        name: name.to_string(),
        path: path.to_path_buf(),
    }
}

/// Reference and target databases for a small distribution
fn fixture(temp: &TempDir, glibc_reference: &str) -> Config {
    let x86 = temp.path().join("x86_64");
    let arm = temp.path().join("aarch64");

    write_repo_db(
        &x86.join("core.db"),
        &[
            DbEntry::new("glibc", glibc_reference),
            DbEntry::new("zlib", "1:1.3.1-2").depends(&["glibc"]),
        ],
    );
    write_repo_db(
        &x86.join("extra.db"),
        &[
            DbEntry::new("libfoo", "2.0-1").depends(&["zlib"]),
            DbEntry::new("libfoo-docs", "2.0-1").base("libfoo"),
            DbEntry::new("foo-cli", "1.5-1")
                .depends(&["libfoo>=2.0"])
                .makedepends(&["cmake"]),
            DbEntry::new("cmake", "3.30.2-1").depends(&["zlib"]),
            DbEntry::new("python-any", "1.0-1").arch("any"),
            DbEntry::new("rust", "1:1.80.1-1"),
        ],
    );

    write_repo_db(
        &arm.join("core.db"),
        &[
            DbEntry::new("glibc", "2.40-1").arch("aarch64"),
            DbEntry::new("zlib", "1:1.3.1-1").arch("aarch64"),
        ],
    );
    write_repo_db(
        &arm.join("extra.db"),
        &[
            DbEntry::new("libfoo", "1.9-1").arch("aarch64"),
            DbEntry::new("rust", "1:1.80.1-1").arch("aarch64"),
            DbEntry::new("aarch64-firmware", "20240101-1").arch("aarch64"),
        ],
    );

    let mut config = Config::default();
    config.repos.reference = vec![
        source("core", &x86.join("core.db")),
        source("extra", &x86.join("extra.db")),
    ];
    config.repos.target = vec![
        source("core", &arm.join("core.db")),
        source("extra", &arm.join("extra.db")),
    ];
    config
}

fn names(packages: &[archport::CandidatePackage]) -> Vec<(&str, u32)> {
    packages
        .iter()
        .map(|p| (p.name.as_str(), p.build_stage))
        .collect()
}

#[test]
fn test_default_plan_includes_newer_packages() {
    let temp = TempDir::new().unwrap();
    let config = fixture(&temp, "2.40-1");
    let reference = config.load_reference().unwrap();
    let target = config.load_target().unwrap();
    assert_eq!(reference.any_len(), 1);

    let policy = ReconcilePolicy::default();
    let result = Reconciler::new(&reference, &target, &policy).reconcile();
    assert!(result.advisories.is_empty());

    let scheduled = schedule(result.candidates);
    assert_eq!(names(&scheduled.packages), vec![("zlib", 0), ("libfoo", 1)]);

    let libfoo = &scheduled.packages[1];
    assert_eq!(libfoo.packages, vec!["libfoo", "libfoo-docs"]);
    assert_eq!(libfoo.current_version.as_deref(), Some("1.9-1"));
}

#[test]
fn test_forced_package_pulls_in_missing_build_dependency() {
    let temp = TempDir::new().unwrap();
    let config = fixture(&temp, "2.40-1");
    let reference = config.load_reference().unwrap();
    let target = config.load_target().unwrap();

    let policy = ReconcilePolicy::default().with_force_list(vec!["foo-cli".to_string()]);
    let result = Reconciler::new(&reference, &target, &policy).reconcile();

    let cmake = result
        .candidates
        .iter()
        .find(|c| c.name == "cmake")
        .unwrap();
    assert_eq!(cmake.added_reason.as_deref(), Some("makedepends for foo-cli"));
    assert!(!cmake.force_latest);
    // libfoo is present in the target, so it is not pulled in
    assert!(result.candidates.iter().all(|c| c.name != "libfoo"));

    let scheduled = schedule(result.candidates);
    assert_eq!(names(&scheduled.packages), vec![("cmake", 0), ("foo-cli", 1)]);
    assert!(scheduled.cycles.is_empty());
}

#[test]
fn test_missing_only_with_blacklist() {
    let temp = TempDir::new().unwrap();
    let config = fixture(&temp, "2.40-1");
    let reference = config.load_reference().unwrap();
    let target = config.load_target().unwrap();

    let policy = ReconcilePolicy::default()
        .with_missing_only(true)
        .with_blacklist(archport::Blacklist::parse("cmake\n"));
    let result = Reconciler::new(&reference, &target, &policy).reconcile();

    // foo-cli needs the blacklisted cmake, cmake itself is blacklisted
    assert!(result.candidates.is_empty());
    assert_eq!(result.skipped_missing, vec!["cmake"]);
    assert!(result.skipped.iter().any(|s| s.basename == "foo-cli"));
}

#[test]
fn test_stale_toolchain_advisory() {
    let temp = TempDir::new().unwrap();
    let config = fixture(&temp, "2.41-1");
    let reference = config.load_reference().unwrap();
    let target = config.load_target().unwrap();

    let policy = ReconcilePolicy::default();
    let result = Reconciler::new(&reference, &target, &policy).reconcile();

    assert!(result.candidates.iter().all(|c| c.name != "glibc"));
    assert!(result.advisories.iter().any(|a| matches!(
        a,
        Advisory::StaleToolchain { basename, .. } if basename == "glibc"
    )));
}

#[test]
fn test_duplicate_basename_across_repos_is_fatal() {
    let temp = TempDir::new().unwrap();
    let mut config = fixture(&temp, "2.40-1");
    let dup = temp.path().join("x86_64").join("community.db");
    write_repo_db(&dup, &[DbEntry::new("zlib-ng", "2.2-1").base("zlib")]);
    config.repos.reference.push(source("community", &dup));

    let err = config.load_reference().unwrap_err();
    assert!(matches!(err, Error::DuplicateBasename { .. }));
    assert!(err.is_fatal());
}

#[test]
fn test_reference_from_state_store() {
    let temp = TempDir::new().unwrap();
    let mut config = fixture(&temp, "2.40-1");
    let state = temp.path().join("state");
    fs::create_dir_all(state.join("extra-x86_64")).unwrap();
    fs::create_dir_all(state.join("extra-aarch64")).unwrap();
    fs::write(state.join("extra-x86_64").join("libfoo"), "libfoo 2.1-1 x86_64\n").unwrap();
    fs::write(state.join("extra-aarch64").join("libfoo"), "libfoo 9.9-1\n").unwrap();
    config.repos.reference_state = Some(state);

    let reference = config.load_reference().unwrap();
    assert_eq!(reference.len(), 1);
    assert_eq!(reference.get("libfoo").unwrap().version, "2.1-1");
}

#[test]
fn test_plan_file_round_trip_and_validation() {
    let temp = TempDir::new().unwrap();
    let config = fixture(&temp, "2.40-1");
    let reference = config.load_reference().unwrap();
    let target = config.load_target().unwrap();
    let policy = ReconcilePolicy::default();
    let scheduled = schedule(Reconciler::new(&reference, &target, &policy).reconcile().candidates);

    let path = temp.path().join("packages_to_build.json");
    BuildPlan::new("archport plan", scheduled.packages.clone())
        .save(&path)
        .unwrap();
    let json = fs::read_to_string(&path).unwrap();
    assert!(json.contains("\"_command\": \"archport plan\""));
    assert!(json.contains("\"glibc\""));

    let loaded = BuildPlan::load(&path).unwrap();
    assert_eq!(loaded.packages, scheduled.packages);

    let tampered = json.replace("\"libfoo\"", "\"../libfoo\"");
    fs::write(&path, tampered).unwrap();
    assert!(matches!(
        BuildPlan::load(&path),
        Err(Error::InvalidPackageName(_))
    ));

    fs::write(&path, "{ not json").unwrap();
    let err = BuildPlan::load(&path).unwrap_err();
    assert!(matches!(err, Error::InvalidPlan { .. }));
}

#[test]
fn test_analyze_and_dependents() {
    let temp = TempDir::new().unwrap();
    let config = fixture(&temp, "2.40-1");
    let reference = config.load_reference().unwrap();
    let target = config.load_target().unwrap();

    let analysis = analyze_repositories(&reference, &target);
    assert_eq!(analysis.target_only, vec!["aarch64-firmware"]);
    assert!(analysis.repo_mismatches.is_empty());
    assert!(analysis.target_newer.is_empty());

    assert_eq!(reference.dependents("zlib"), vec!["cmake", "libfoo"]);
}
