//! Apply-loop lifecycle tests.
//!
//! These drive `ChangesetRunner` and `apply_changelog` across repeated runs
//! with scripted executors to verify idempotency, run-always, context gating,
//! the fail-on-error policy, validation before execution, and staging cleanup.

use std::fs;
use std::path::Path;

use migrator::apply::{ApplyPlan, apply_changelog};
use migrator::core::invariants::DefaultChangesetValidator;
use migrator::core::types::{Changeset, ChangesetId, ChangesetOutcome, RunSummary, SkipReason};
use migrator::error::EngineError;
use migrator::io::changelog::TomlChangelogSource;
use migrator::io::ledger::{ExecutionLedger, JsonlLedger};
use migrator::io::staging::StagingArea;
use migrator::runner::ChangesetRunner;
use migrator::test_support::{
    MemoryLedger, ScriptedExecutorFactory, changeset, failing, with_contexts,
};

fn run_with<L: ExecutionLedger>(
    changesets: &[Changeset],
    context: Option<&str>,
    ledger: &mut L,
    factory: &ScriptedExecutorFactory,
    staging_dir: &Path,
) -> Result<RunSummary, EngineError> {
    let staging = StagingArea::new(staging_dir);
    ChangesetRunner::new(ledger, factory, &staging).execute(changesets, context)
}

fn staged_files(dir: &Path) -> usize {
    fs::read_dir(dir).expect("read staging dir").count()
}

fn executed_ids(factory: &ScriptedExecutorFactory) -> Vec<String> {
    factory
        .scripts_run()
        .iter()
        .map(|body| body.trim_start_matches("// ").to_string())
        .collect()
}

/// Running the same changelog twice executes each changeset once and leaves
/// the ledger unchanged by the second run.
#[test]
fn second_run_is_a_no_op() {
    let temp = tempfile::tempdir().expect("tempdir");
    let changesets = vec![changeset("a", "1"), changeset("a", "2"), changeset("b", "1")];
    let mut ledger = JsonlLedger::new(temp.path().join("ledger.jsonl"));

    let first = ScriptedExecutorFactory::succeeding();
    let summary = run_with(&changesets, None, &mut ledger, &first, temp.path()).expect("run 1");
    assert_eq!(summary.executed(), 3);
    let after_first = fs::read_to_string(ledger.path()).expect("ledger");

    let second = ScriptedExecutorFactory::succeeding();
    let summary = run_with(&changesets, None, &mut ledger, &second, temp.path()).expect("run 2");
    assert_eq!(summary.executed(), 0);
    assert_eq!(summary.skipped(), 3);
    assert_eq!(
        summary.outcome_of(&ChangesetId::new("a", "1")),
        Some(&ChangesetOutcome::Skipped {
            reason: SkipReason::AlreadyExecuted
        })
    );
    assert_eq!(second.opened(), 0, "no backend needed for an up-to-date changelog");
    assert_eq!(fs::read_to_string(ledger.path()).expect("ledger"), after_first);
}

/// Run-always changesets execute on every run and append a record each time.
#[test]
fn run_always_executes_every_time() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut always = changeset("a", "always");
    always.run_always = true;
    let changesets = vec![changeset("a", "once"), always];
    let mut ledger = MemoryLedger::default();

    for _ in 0..3 {
        let factory = ScriptedExecutorFactory::succeeding();
        run_with(&changesets, None, &mut ledger, &factory, temp.path()).expect("run");
    }

    assert_eq!(ledger.count_for(&ChangesetId::new("a", "once")), 1);
    assert_eq!(ledger.count_for(&ChangesetId::new("a", "always")), 3);
}

/// A (no context), B {users}, C {admins}: B and C never run together.
#[test]
fn context_gating_selects_changesets() {
    let temp = tempfile::tempdir().expect("tempdir");
    let changesets = vec![
        changeset("dev", "A"),
        with_contexts(changeset("dev", "B"), &["users"]),
        with_contexts(changeset("dev", "C"), &["admins"]),
    ];

    let cases: [(Option<&str>, &[&str]); 3] = [
        (None, &["dev:A"]),
        (Some("users"), &["dev:A", "dev:B"]),
        (Some("admins"), &["dev:A", "dev:C"]),
    ];
    for (context, expected) in cases {
        let mut ledger = MemoryLedger::default();
        let factory = ScriptedExecutorFactory::succeeding();
        let summary =
            run_with(&changesets, context, &mut ledger, &factory, temp.path()).expect("run");

        assert_eq!(executed_ids(&factory), expected, "context {context:?}");
        let recorded: Vec<String> = ledger.records().iter().map(|r| r.id().to_string()).collect();
        assert_eq!(recorded, expected, "context {context:?}");
        assert_eq!(summary.skipped(), 3 - expected.len());
    }
}

/// Skipped-by-context changesets stay pending and run once the context matches.
#[test]
fn context_skips_leave_no_ledger_trace() {
    let temp = tempfile::tempdir().expect("tempdir");
    let changesets = vec![with_contexts(changeset("dev", "B"), &["users"])];
    let mut ledger = MemoryLedger::default();

    let factory = ScriptedExecutorFactory::succeeding();
    run_with(&changesets, None, &mut ledger, &factory, temp.path()).expect("run");
    assert!(ledger.records().is_empty());

    let factory = ScriptedExecutorFactory::succeeding();
    run_with(&changesets, Some("users"), &mut ledger, &factory, temp.path()).expect("run");
    assert_eq!(ledger.records().len(), 1);
}

/// [X (fail_on_error=true, fails), Y]: X not ledgered, Y never runs, error surfaces.
#[test]
fn fail_fast_aborts_run() {
    let temp = tempfile::tempdir().expect("tempdir");
    let changesets = vec![failing("a", "X", true), changeset("a", "Y")];
    let mut ledger = MemoryLedger::default();
    let factory = ScriptedExecutorFactory::succeeding();

    let err = run_with(&changesets, None, &mut ledger, &factory, temp.path()).unwrap_err();
    assert!(matches!(err, EngineError::Command { .. }), "{err}");
    assert!(ledger.records().is_empty());
    assert_eq!(factory.scripts_run().len(), 1, "Y must not execute");
    assert_eq!(factory.shutdowns(), 1);
}

/// [X (fail_on_error=false, fails), Y]: X ledgered anyway, Y executes, no error.
#[test]
fn fail_soft_records_and_continues() {
    let temp = tempfile::tempdir().expect("tempdir");
    let changesets = vec![failing("a", "X", false), changeset("a", "Y")];
    let mut ledger = MemoryLedger::default();
    let factory = ScriptedExecutorFactory::succeeding();

    let summary = run_with(&changesets, None, &mut ledger, &factory, temp.path()).expect("run");
    assert!(matches!(
        summary.outcome_of(&ChangesetId::new("a", "X")),
        Some(ChangesetOutcome::FailedRecorded { .. })
    ));
    assert_eq!(
        summary.outcome_of(&ChangesetId::new("a", "Y")),
        Some(&ChangesetOutcome::Executed)
    );
    let recorded: Vec<String> = ledger.records().iter().map(|r| r.id().to_string()).collect();
    assert_eq!(recorded, vec!["a:X", "a:Y"]);

    // The recorded failure is not retried on the next run.
    let rerun = ScriptedExecutorFactory::succeeding();
    run_with(&changesets, None, &mut ledger, &rerun, temp.path()).expect("rerun");
    assert!(rerun.scripts_run().is_empty());
}

/// Staging failures follow the same fail-on-error policy as command failures.
#[test]
fn staging_failure_is_policy_gated() {
    let temp = tempfile::tempdir().expect("tempdir");
    let missing_dir = temp.path().join("does-not-exist");
    let mut soft = changeset("a", "soft");
    soft.fail_on_error = false;
    let mut ledger = MemoryLedger::default();
    let factory = ScriptedExecutorFactory::succeeding();

    let summary =
        run_with(&[soft], None, &mut ledger, &factory, &missing_dir).expect("fail-soft run");
    assert_eq!(summary.failed_recorded(), 1);
    assert_eq!(ledger.records().len(), 1);

    let mut ledger = MemoryLedger::default();
    let err = run_with(&[changeset("a", "hard")], None, &mut ledger, &factory, &missing_dir)
        .unwrap_err();
    assert!(matches!(err, EngineError::Staging { .. }), "{err}");
    assert!(ledger.records().is_empty());
}

/// Duplicate identities are rejected before any backend launch or ledger write.
#[test]
fn duplicate_identity_rejected_before_execution() {
    let temp = tempfile::tempdir().expect("tempdir");
    let changelog = temp.path().join("changelog.toml");
    fs::write(
        &changelog,
        r#"
[[changeset]]
author = "a"
id = "1"
scripts = ["db.x.insertOne({});"]

[[changeset]]
author = "a"
id = "1"
scripts = ["db.y.insertOne({});"]
"#,
    )
    .expect("write changelog");
    let staging_dir = temp.path().join("staging");
    fs::create_dir_all(&staging_dir).expect("staging dir");
    let staging = StagingArea::new(&staging_dir);
    let mut ledger = JsonlLedger::new(temp.path().join("ledger.jsonl"));
    let factory = ScriptedExecutorFactory::succeeding();

    let err = apply_changelog(
        ApplyPlan {
            source: &TomlChangelogSource::new(&changelog),
            validator: &DefaultChangesetValidator,
            ledger: &mut ledger,
            factory: &factory,
            staging: &staging,
        },
        None,
    )
    .unwrap_err();

    assert!(matches!(err, EngineError::Validation(_)), "{err}");
    assert_eq!(factory.opened(), 0);
    assert!(!ledger.path().exists());
    assert_eq!(staged_files(&staging_dir), 0);
}

/// No staged files survive a run, whether it succeeds or aborts.
#[test]
fn staged_files_are_removed_on_every_path() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut ledger = MemoryLedger::default();

    let ok = ScriptedExecutorFactory::succeeding();
    run_with(
        &[changeset("a", "1"), failing("a", "2", false)],
        None,
        &mut ledger,
        &ok,
        temp.path(),
    )
    .expect("run");
    assert_eq!(ok.staged_paths().len(), 2);
    assert!(ok.staged_paths().iter().all(|p| !p.exists()));

    let aborting = ScriptedExecutorFactory::succeeding();
    run_with(
        &[failing("a", "3", true)],
        None,
        &mut ledger,
        &aborting,
        temp.path(),
    )
    .unwrap_err();
    assert_eq!(staged_files(temp.path()), 0);
}

/// Staged file names derive from the source label and change id.
#[test]
fn staged_file_names_follow_changeset_identity() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cs = changeset("a", "ChangeSet-7");
    cs.source_label = "changes/users.toml".to_string();
    let mut ledger = MemoryLedger::default();
    let factory = ScriptedExecutorFactory::succeeding();

    run_with(&[cs], None, &mut ledger, &factory, temp.path()).expect("run");
    let name = factory.staged_paths()[0]
        .file_name()
        .expect("file name")
        .to_string_lossy()
        .into_owned();
    assert!(name.starts_with("changes_users.ChangeSet-7."), "{name}");
}
