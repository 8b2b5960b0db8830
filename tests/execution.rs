// tests/execution.rs

//! Batch and bootstrap execution against a recording build host

mod common;

use archport::Error;
use archport::batch::{BatchOptions, BatchRunner};
use archport::blacklist::Blacklist;
use archport::bootstrap::{BootstrapOptions, ToolchainBootstrap};
use archport::ledger::{BOOTSTRAP_LEDGER, ProgressLedger, ProgressMarker};
use archport::plan::BuildPlan;
use archport::progress::SilentProgress;
use common::{RecordingHost, RecordingProgress, Workspace, candidate, plan_with_checkouts};
use std::fs;

fn batch_options(ws: &Workspace) -> BatchOptions {
    BatchOptions {
        pkgbuilds_dir: ws.pkgbuilds(),
        blacklist: Blacklist::new(),
        resume: false,
        stop_on_failure: false,
        retry_path: ws.retry_path(),
    }
}

#[test]
fn test_batch_builds_in_plan_order() {
    let ws = Workspace::new();
    let plan = plan_with_checkouts(&ws, &["zlib", "openssl", "curl"]);
    let executor = ws.executor(RecordingHost::new(), false);
    let progress = SilentProgress::new();
    let runner = BatchRunner::new(&executor, ws.ledger(), batch_options(&ws), &progress);

    let report = runner.run(&plan).unwrap();

    assert!(report.is_success());
    assert_eq!(report.succeeded, vec!["zlib", "openssl", "curl"]);
    let host = executor.host();
    assert_eq!(host.built(), vec!["zlib", "openssl", "curl"]);
    assert_eq!(host.calls_with("upload extra-testing").len(), 3);

    // Every sandbox is removed exactly once
    let snapshots = host.calls_with("snapshot ");
    let removals = host.calls_with("remove ");
    assert_eq!(snapshots.len(), 3);
    assert_eq!(removals.len(), 3);
    for snapshot in &snapshots {
        let name = snapshot.trim_start_matches("snapshot ");
        assert_eq!(
            removals.iter().filter(|r| r.ends_with(name)).count(),
            1,
            "{} not removed exactly once",
            name
        );
    }
    assert!(ws.sandboxes().is_empty());

    assert_eq!(ws.ledger().read().unwrap(), None);
    assert!(!ws.retry_path().exists());
    assert!(report.retry_file.is_none());
}

#[test]
fn test_failure_is_recorded_and_batch_continues() {
    let ws = Workspace::new();
    let plan = plan_with_checkouts(&ws, &["zlib", "openssl", "curl"]);
    let executor = ws.executor(RecordingHost::new().failing(&["openssl"]), false);
    let progress = SilentProgress::new();
    let runner = BatchRunner::new(&executor, ws.ledger(), batch_options(&ws), &progress);

    let report = runner.run(&plan).unwrap();

    assert!(!report.is_success());
    assert_eq!(report.succeeded, vec!["zlib", "curl"]);
    assert_eq!(report.failed.len(), 1);
    let failed = &report.failed[0];
    assert_eq!(failed.package, "openssl");
    assert_eq!(failed.exit_code, Some(2));
    assert!(failed.preserved.is_none());

    let log = failed.log_path.as_ref().unwrap();
    let content = fs::read_to_string(log).unwrap();
    assert!(content.starts_with("Package: openssl\n"));
    assert!(content.contains("Exit code: 2"));
    assert!(content.contains("error: compilation failed"));

    let retry = BuildPlan::load(ws.retry_path()).unwrap();
    assert_eq!(retry.packages.len(), 1);
    assert_eq!(retry.packages[0].name, "openssl");
    assert_eq!(retry.command, "archport plan");

    assert!(ws.sandboxes().is_empty());
    // Not cleared: the batch did not fully succeed
    assert_eq!(
        ws.ledger().read().unwrap(),
        Some(ProgressMarker::Package("curl".to_string()))
    );
}

#[test]
fn test_preserved_failure_skips_teardown() {
    let ws = Workspace::new();
    let plan = plan_with_checkouts(&ws, &["zlib", "openssl", "curl"]);
    let executor = ws.executor(RecordingHost::new().failing(&["openssl"]), true);
    let progress = SilentProgress::new();
    let runner = BatchRunner::new(&executor, ws.ledger(), batch_options(&ws), &progress);

    let report = runner.run(&plan).unwrap();

    let preserved = report.failed[0].preserved.clone().unwrap();
    assert!(preserved.is_dir());
    assert_eq!(ws.sandboxes().len(), 1);
    assert_eq!(executor.host().calls_with("remove ").len(), 2);
}

#[test]
fn test_stop_on_failure() {
    let ws = Workspace::new();
    let plan = plan_with_checkouts(&ws, &["zlib", "openssl", "curl"]);
    let executor = ws.executor(RecordingHost::new().failing(&["openssl"]), true);
    let progress = SilentProgress::new();
    let mut options = batch_options(&ws);
    options.stop_on_failure = true;
    let runner = BatchRunner::new(&executor, ws.ledger(), options, &progress);

    let report = runner.run(&plan).unwrap();

    assert!(report.stopped_early);
    assert_eq!(executor.host().built(), vec!["zlib", "openssl"]);
    assert_eq!(report.succeeded, vec!["zlib"]);
    assert!(ws.retry_path().exists());
}

#[test]
fn test_resume_after_recorded_package() {
    let ws = Workspace::new();
    let plan = plan_with_checkouts(&ws, &["zlib", "openssl", "curl", "git"]);
    ws.ledger()
        .record(&ProgressMarker::Package("openssl".to_string()))
        .unwrap();
    let executor = ws.executor(RecordingHost::new(), false);
    let progress = SilentProgress::new();
    let mut options = batch_options(&ws);
    options.resume = true;
    let runner = BatchRunner::new(&executor, ws.ledger(), options, &progress);

    let report = runner.run(&plan).unwrap();

    assert_eq!(report.resumed_from, 2);
    assert_eq!(executor.host().built(), vec!["curl", "git"]);
    assert_eq!(ws.ledger().read().unwrap(), None);
}

#[test]
fn test_without_resume_ledger_is_ignored() {
    let ws = Workspace::new();
    let plan = plan_with_checkouts(&ws, &["zlib", "openssl"]);
    ws.ledger()
        .record(&ProgressMarker::Package("zlib".to_string()))
        .unwrap();
    let executor = ws.executor(RecordingHost::new(), false);
    let progress = SilentProgress::new();
    let runner = BatchRunner::new(&executor, ws.ledger(), batch_options(&ws), &progress);

    runner.run(&plan).unwrap();
    assert_eq!(executor.host().built(), vec!["zlib", "openssl"]);
}

#[test]
fn test_cancellation_tears_down_and_stops() {
    let ws = Workspace::new();
    let plan = plan_with_checkouts(&ws, &["zlib", "openssl", "curl"]);
    // Preservation does not apply to interrupted builds
    let executor = ws.executor(RecordingHost::new().cancel_during("openssl"), true);
    let progress = SilentProgress::new();
    let runner = BatchRunner::new(&executor, ws.ledger(), batch_options(&ws), &progress);

    let err = runner.run(&plan).unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(executor.host().built(), vec!["zlib", "openssl"]);
    assert!(ws.sandboxes().is_empty());
    assert_eq!(executor.host().calls_with("remove ").len(), 2);
    // The interrupted package is not recorded
    assert_eq!(
        ws.ledger().read().unwrap(),
        Some(ProgressMarker::Package("zlib".to_string()))
    );
}

#[test]
fn test_cancel_before_start() {
    let ws = Workspace::new();
    let plan = plan_with_checkouts(&ws, &["zlib"]);
    let executor = ws.executor(RecordingHost::new(), false);
    executor.cancel_token().cancel();
    let progress = SilentProgress::new();
    let runner = BatchRunner::new(&executor, ws.ledger(), batch_options(&ws), &progress);

    assert!(matches!(runner.run(&plan), Err(Error::Cancelled)));
    assert!(executor.host().built().is_empty());
}

#[test]
fn test_invalid_name_rejected_before_sandbox_work() {
    let ws = Workspace::new();
    let mut plan = plan_with_checkouts(&ws, &["zlib"]);
    plan.packages.push(candidate("../../etc", "1.0-1"));
    let executor = ws.executor(RecordingHost::new(), false);
    let progress = SilentProgress::new();
    let runner = BatchRunner::new(&executor, ws.ledger(), batch_options(&ws), &progress);

    let err = runner.run(&plan).unwrap_err();

    assert!(matches!(
        err,
        Error::InvalidPackageName(_) | Error::PathTraversal(_)
    ));
    assert!(executor.host().calls().is_empty());
}

#[test]
fn test_missing_checkout_is_package_failure() {
    let ws = Workspace::new();
    let mut plan = plan_with_checkouts(&ws, &["zlib"]);
    plan.packages.push(candidate("ghost", "1.0-1"));
    let executor = ws.executor(RecordingHost::new(), false);
    let progress = SilentProgress::new();
    let runner = BatchRunner::new(&executor, ws.ledger(), batch_options(&ws), &progress);

    let report = runner.run(&plan).unwrap();

    assert_eq!(report.succeeded, vec!["zlib"]);
    assert_eq!(report.failed[0].package, "ghost");
    assert_eq!(executor.host().calls_with("snapshot ").len(), 1);
}

#[test]
fn test_skipped_and_blacklisted_are_filtered() {
    let ws = Workspace::new();
    let mut plan = plan_with_checkouts(&ws, &["zlib", "rust", "ghc"]);
    plan.packages[2].skip = true;
    plan.packages[2].skip_reason = Some("blacklisted".to_string());
    let executor = ws.executor(RecordingHost::new(), false);
    let progress = SilentProgress::new();
    let mut options = batch_options(&ws);
    options.blacklist = Blacklist::parse("# heavy\nrus*\n");
    let runner = BatchRunner::new(&executor, ws.ledger(), options, &progress);

    let queue = runner.queue(&plan).unwrap();
    assert_eq!(queue.pending().len(), 1);
    assert_eq!(queue.filtered, vec!["rust", "ghc"]);
    // Queueing alone never touches the host
    assert!(executor.host().calls().is_empty());

    let report = runner.run(&plan).unwrap();
    assert_eq!(report.succeeded, vec!["zlib"]);
    assert_eq!(report.filtered, vec!["rust", "ghc"]);
}

#[test]
fn test_leftover_sandboxes_removed() {
    let ws = Workspace::new();
    fs::create_dir_all(ws.build_root().join("archport-crashed")).unwrap();
    let plan = plan_with_checkouts(&ws, &["zlib"]);
    let executor = ws.executor(RecordingHost::new(), false);
    let progress = SilentProgress::new();
    let runner = BatchRunner::new(&executor, ws.ledger(), batch_options(&ws), &progress);

    runner.run(&plan).unwrap();

    assert_eq!(executor.host().calls()[0], "remove archport-crashed");
    assert!(ws.sandboxes().is_empty());
    assert!(ws.build_root().join("root").is_dir());
}

#[test]
fn test_no_upload() {
    let ws = Workspace::new();
    let plan = plan_with_checkouts(&ws, &["zlib"]);
    let mut options = ws.options(false);
    options.no_upload = true;
    let executor = archport::sandbox::SandboxExecutor::new(
        RecordingHost::new(),
        options,
        archport::sandbox::BuildLogStore::new(ws.logs(), 3),
        archport::cancel::CancellationToken::new(),
    );
    let progress = SilentProgress::new();
    let runner = BatchRunner::new(&executor, ws.ledger(), batch_options(&ws), &progress);

    let report = runner.run(&plan).unwrap();
    assert!(report.is_success());
    assert!(executor.host().calls_with("upload").is_empty());
}

#[test]
fn test_progress_reports_stages_and_packages() {
    let ws = Workspace::new();
    let mut plan = plan_with_checkouts(&ws, &["zlib", "openssl", "curl"]);
    plan.packages[1].build_stage = 1;
    plan.packages[2].build_stage = 1;
    let executor = ws.executor(RecordingHost::new().failing(&["openssl"]), false);
    let progress = RecordingProgress::default();
    let runner = BatchRunner::new(&executor, ws.ledger(), batch_options(&ws), &progress);

    runner.run(&plan).unwrap();

    assert_eq!(
        progress.events(),
        vec![
            "run 3",
            "stage 0",
            "start zlib",
            "built zlib",
            "stage 1",
            "start openssl",
            "failed openssl",
            "start curl",
            "built curl",
            "finished 2 1",
        ]
    );
}

#[test]
fn test_resume_with_nothing_left_clears_ledger() {
    let ws = Workspace::new();
    let plan = plan_with_checkouts(&ws, &["zlib", "openssl"]);
    ws.ledger()
        .record(&ProgressMarker::Package("openssl".to_string()))
        .unwrap();
    let executor = ws.executor(RecordingHost::new(), false);
    let progress = RecordingProgress::default();
    let mut options = batch_options(&ws);
    options.resume = true;
    let runner = BatchRunner::new(&executor, ws.ledger(), options, &progress);

    let report = runner.run(&plan).unwrap();

    assert!(report.is_success());
    assert_eq!(report.resumed_from, 2);
    assert!(executor.host().calls().is_empty());
    assert_eq!(ws.ledger().read().unwrap(), None);
    assert_eq!(progress.events(), vec!["finished 0 0"]);
}

fn small_bootstrap() -> BootstrapOptions {
    let names = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    BootstrapOptions {
        stage1: names(&["glibc", "binutils"]),
        stage2: names(&["glibc", "valgrind"]),
        special_sources: names(&["glibc"]),
        extra_repo_packages: names(&["valgrind"]),
        extra_reinstall: names(&["gcc-libs"]),
    }
}

fn bootstrap_ledger(ws: &Workspace) -> ProgressLedger {
    ProgressLedger::new(ws.state().join(BOOTSTRAP_LEDGER))
}

#[test]
fn test_bootstrap_halts_then_resumes() {
    let ws = Workspace::new();
    for name in ["glibc", "binutils", "valgrind"] {
        ws.write_pkgbuild(name, "2.0-1");
    }
    let progress = SilentProgress::new();

    let executor = ws.executor(RecordingHost::new().failing(&["valgrind"]), false);
    let bootstrap = ToolchainBootstrap::new(
        &executor,
        bootstrap_ledger(&ws),
        small_bootstrap(),
        ws.pkgbuilds(),
        &progress,
    );
    let report = bootstrap.run(false).unwrap();

    assert!(!report.is_success());
    assert_eq!(report.total, 4);
    assert_eq!(report.built, vec!["glibc", "binutils", "glibc"]);
    assert_eq!(report.failed.as_ref().unwrap().package, "valgrind");
    let host = executor.host();
    assert_eq!(host.calls_with("refresh root").len(), 4);
    assert_eq!(host.calls_with("clear-cache").len(), 4);
    assert_eq!(
        host.calls_with("install root")[0],
        "install root glibc binutils valgrind gcc-libs"
    );
    assert_eq!(host.calls_with("upload core-testing").len(), 3);
    assert_eq!(
        bootstrap_ledger(&ws).read().unwrap(),
        Some(ProgressMarker::Index(2))
    );

    let executor = ws.executor(RecordingHost::new(), false);
    let bootstrap = ToolchainBootstrap::new(
        &executor,
        bootstrap_ledger(&ws),
        small_bootstrap(),
        ws.pkgbuilds(),
        &progress,
    );
    let report = bootstrap.run(true).unwrap();

    assert!(report.is_success());
    assert_eq!(report.resumed_from, 3);
    assert_eq!(executor.host().built(), vec!["valgrind"]);
    assert_eq!(executor.host().calls_with("upload extra-testing").len(), 1);
    assert_eq!(bootstrap_ledger(&ws).read().unwrap(), None);
}

#[test]
fn test_bootstrap_requires_special_sources() {
    let ws = Workspace::new();
    ws.write_pkgbuild("binutils", "2.43-1");
    ws.write_pkgbuild("valgrind", "3.23-1");
    let executor = ws.executor(RecordingHost::new(), false);
    let progress = SilentProgress::new();
    let bootstrap = ToolchainBootstrap::new(
        &executor,
        bootstrap_ledger(&ws),
        small_bootstrap(),
        ws.pkgbuilds(),
        &progress,
    );

    let err = bootstrap.check_sources(None).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert!(err.is_fatal());
}

#[test]
fn test_bootstrap_refresh_failure_is_fatal() {
    let ws = Workspace::new();
    for name in ["glibc", "binutils", "valgrind"] {
        ws.write_pkgbuild(name, "2.0-1");
    }
    let mut host = RecordingHost::new();
    host.fail_refresh = true;
    let executor = ws.executor(host, false);
    let progress = SilentProgress::new();
    let bootstrap = ToolchainBootstrap::new(
        &executor,
        bootstrap_ledger(&ws),
        small_bootstrap(),
        ws.pkgbuilds(),
        &progress,
    );

    assert!(bootstrap.run(false).is_err());
    assert!(executor.host().built().is_empty());
}

#[test]
fn test_bootstrap_reinstall_failure_is_tolerated() {
    let ws = Workspace::new();
    for name in ["glibc", "binutils", "valgrind"] {
        ws.write_pkgbuild(name, "2.0-1");
    }
    let mut host = RecordingHost::new();
    host.fail_install = true;
    let executor = ws.executor(host, false);
    let progress = SilentProgress::new();
    let bootstrap = ToolchainBootstrap::new(
        &executor,
        bootstrap_ledger(&ws),
        small_bootstrap(),
        ws.pkgbuilds(),
        &progress,
    );

    let report = bootstrap.run(false).unwrap();
    assert!(report.is_success());
    assert_eq!(report.built.len(), 4);
}

#[test]
fn test_bootstrap_progress_follows_stages() {
    let ws = Workspace::new();
    for name in ["glibc", "binutils", "valgrind"] {
        ws.write_pkgbuild(name, "2.0-1");
    }
    let executor = ws.executor(RecordingHost::new().failing(&["valgrind"]), false);
    let progress = RecordingProgress::default();
    let bootstrap = ToolchainBootstrap::new(
        &executor,
        bootstrap_ledger(&ws),
        small_bootstrap(),
        ws.pkgbuilds(),
        &progress,
    );

    bootstrap.run(false).unwrap();

    assert_eq!(
        progress.events(),
        vec![
            "run 4",
            "stage 1",
            "start glibc",
            "built glibc",
            "start binutils",
            "built binutils",
            "stage 2",
            "start glibc",
            "built glibc",
            "start valgrind",
            "failed valgrind",
            "finished 3 1",
        ]
    );
}
