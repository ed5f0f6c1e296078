mod support;

use guardrail_engine::{
    Collaborators, DenyConfirmer, EngineConfig, EngineError, IntegrityVerifier, LockError,
    NoopSyntaxChecker, OperationKind, OperationLock, OperationOptions, OperationOutcome,
    OperationSafetyController, OutcomeStatus, QueueConfirmer, StaticRepoState, Verdict,
    VerificationLevel,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use support::ScriptedRunner;

fn write_tree(root: &Path) {
    fs::create_dir_all(root.join("src")).expect("src dir should be created");
    fs::write(root.join("src/lib.rs"), "original lib\n").expect("lib.rs should write");
    fs::write(root.join("src/lib_test.rs"), "original test\n").expect("test file should write");
    fs::write(root.join("README.md"), "original readme\n").expect("readme should write");
}

fn controller(
    root: &Path,
    confirmer: Arc<dyn guardrail_engine::Confirmer>,
    runner: Arc<ScriptedRunner>,
) -> OperationSafetyController {
    OperationSafetyController::new(
        root,
        EngineConfig::default(),
        Collaborators {
            repo_state: Arc::new(StaticRepoState::default()),
            confirmer,
            runner,
            syntax: Arc::new(NoopSyntaxChecker),
        },
    )
}

fn source_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("src/lib.rs"), PathBuf::from("src/lib_test.rs")]
}

fn assert_completed(outcome: &OperationOutcome) {
    assert_eq!(outcome.status, OutcomeStatus::Completed);
}

#[tokio::test(flavor = "current_thread")]
async fn run_protected_low_risk_expected_no_confirmation_needed() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    write_tree(tmp.path());

    // A denying confirmer proves the gate is never consulted at Low risk.
    let runner = Arc::new(ScriptedRunner::succeeding(tmp.path()));
    let controller = controller(tmp.path(), Arc::new(DenyConfirmer), runner.clone());

    let outcome = controller
        .run_protected(
            OperationKind::Format,
            &source_paths(),
            &OperationOptions::default(),
        )
        .await
        .expect("run should succeed");

    assert_completed(&outcome);
    assert_eq!(outcome.verdict, Some(Verdict::Passed));
    assert!(!outcome.rollback_performed);
    assert!(!outcome.residual_failure);
    assert_eq!(runner.invocation_count(), 1);

    let snapshot_id = outcome.snapshot_id.expect("snapshot should be recorded");
    let listed = controller.store().list().expect("list should succeed");
    assert!(listed.iter().any(|s| s.id == snapshot_id));
}

#[tokio::test(flavor = "current_thread")]
async fn run_protected_medium_risk_declined_expected_cancelled_before_snapshot() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    write_tree(tmp.path());

    let runner = Arc::new(ScriptedRunner::succeeding(tmp.path()));
    let controller = controller(tmp.path(), Arc::new(DenyConfirmer), runner.clone());

    // Cleanup with no test files among targets scores past Medium.
    let outcome = controller
        .run_protected(
            OperationKind::Cleanup,
            &[PathBuf::from("src/lib.rs"), PathBuf::from("README.md")],
            &OperationOptions::default(),
        )
        .await
        .expect("run should succeed");

    assert_eq!(outcome.status, OutcomeStatus::Cancelled);
    assert_eq!(outcome.snapshot_id, None);
    assert_eq!(runner.invocation_count(), 0);
    assert!(controller.store().list().expect("list should succeed").is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn run_protected_runner_failure_rollback_accepted_expected_tree_restored() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    write_tree(tmp.path());

    let runner = Arc::new(ScriptedRunner::failing(tmp.path()).with_mutation(|root| {
        fs::write(root.join("src/lib.rs"), "mangled by operation\n")
            .expect("mutation should write");
    }));
    let confirmer = Arc::new(QueueConfirmer::with_answers([true]));
    let controller = controller(tmp.path(), confirmer, runner);

    let outcome = controller
        .run_protected(
            OperationKind::Format,
            &source_paths(),
            &OperationOptions::default(),
        )
        .await
        .expect("run should succeed");

    assert_completed(&outcome);
    assert!(outcome.rollback_performed);
    assert!(!outcome.residual_failure);
    let lib = fs::read_to_string(tmp.path().join("src/lib.rs")).expect("lib should read");
    assert_eq!(lib, "original lib\n");

    // The restored tree verifies clean against the same snapshot.
    let snapshot_id = outcome.snapshot_id.expect("snapshot should be recorded");
    let baseline = controller
        .store()
        .find(&snapshot_id)
        .expect("find should succeed")
        .expect("snapshot should exist");
    let report = IntegrityVerifier::new(&EngineConfig::default())
        .verify(
            tmp.path(),
            Some(&baseline),
            VerificationLevel::Standard,
            &NoopSyntaxChecker,
        )
        .await;
    assert_ne!(report.verdict(), Verdict::Failed);
}

#[tokio::test(flavor = "current_thread")]
async fn run_protected_verification_failure_expected_rollback_restores_deleted_file() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    write_tree(tmp.path());

    // Runner claims success but deletes a baseline file.
    let runner = Arc::new(ScriptedRunner::succeeding(tmp.path()).with_mutation(|root| {
        fs::remove_file(root.join("README.md")).expect("delete should succeed");
    }));
    let confirmer = Arc::new(QueueConfirmer::with_answers([true]));
    let controller = controller(tmp.path(), confirmer, runner);

    let outcome = controller
        .run_protected(
            OperationKind::Format,
            &source_paths(),
            &OperationOptions::default(),
        )
        .await
        .expect("run should succeed");

    assert_completed(&outcome);
    assert_eq!(outcome.verdict, Some(Verdict::Failed));
    assert!(outcome.rollback_performed);
    let readme = fs::read_to_string(tmp.path().join("README.md")).expect("readme should read");
    assert_eq!(readme, "original readme\n");
}

#[tokio::test(flavor = "current_thread")]
async fn run_protected_rollback_declined_expected_residual_failure_left_in_place() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    write_tree(tmp.path());

    let runner = Arc::new(ScriptedRunner::failing(tmp.path()).with_mutation(|root| {
        fs::write(root.join("src/lib.rs"), "mangled by operation\n")
            .expect("mutation should write");
    }));
    let confirmer = Arc::new(QueueConfirmer::with_answers([false]));
    let controller = controller(tmp.path(), confirmer, runner);

    let outcome = controller
        .run_protected(
            OperationKind::Format,
            &source_paths(),
            &OperationOptions::default(),
        )
        .await
        .expect("run should succeed");

    assert_completed(&outcome);
    assert!(!outcome.rollback_performed);
    assert!(outcome.residual_failure);
    // Failed state is preserved for manual recovery from the snapshot.
    let lib = fs::read_to_string(tmp.path().join("src/lib.rs")).expect("lib should read");
    assert_eq!(lib, "mangled by operation\n");
    assert!(outcome.snapshot_id.is_some());
}

#[tokio::test(flavor = "current_thread")]
async fn run_protected_while_locked_expected_operation_in_progress() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    write_tree(tmp.path());

    let runner = Arc::new(ScriptedRunner::succeeding(tmp.path()));
    let controller = controller(tmp.path(), Arc::new(DenyConfirmer), runner);

    let held = OperationLock::acquire(tmp.path(), ".guardrail").expect("lock should acquire");
    let blocked = controller
        .run_protected(
            OperationKind::Format,
            &source_paths(),
            &OperationOptions::default(),
        )
        .await;
    assert!(matches!(
        blocked,
        Err(EngineError::Lock(LockError::OperationInProgress { .. }))
    ));

    drop(held);
    let outcome = controller
        .run_protected(
            OperationKind::Format,
            &source_paths(),
            &OperationOptions::default(),
        )
        .await
        .expect("run should succeed after lock release");
    assert_completed(&outcome);
}

#[tokio::test(flavor = "current_thread")]
async fn run_protected_emergency_stop_marker_expected_cancelled() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    write_tree(tmp.path());
    fs::create_dir_all(tmp.path().join(".guardrail")).expect("reserved dir should be created");
    fs::write(tmp.path().join(".guardrail/EMERGENCY_STOP"), "")
        .expect("stop marker should write");

    let runner = Arc::new(ScriptedRunner::succeeding(tmp.path()));
    let controller = controller(tmp.path(), Arc::new(DenyConfirmer), runner.clone());

    let outcome = controller
        .run_protected(
            OperationKind::Verify,
            &source_paths(),
            &OperationOptions {
                pre_authorized: true,
                ..OperationOptions::default()
            },
        )
        .await
        .expect("run should succeed");

    assert_eq!(outcome.status, OutcomeStatus::Cancelled);
    assert_eq!(runner.invocation_count(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn run_protected_protected_zone_expected_gate_even_at_low_risk() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    write_tree(tmp.path());
    fs::create_dir_all(tmp.path().join(".claude/commands"))
        .expect("protected dir should be created");
    fs::write(tmp.path().join(".claude/commands/tidy.md"), "# tidy\n")
        .expect("protected file should write");

    let paths = vec![PathBuf::from(".claude/commands/tidy.md"), PathBuf::from("src/lib_test.rs")];

    // Verify on a test file is Low risk, but the protected zone forces
    // the confirmation gate.
    let runner = Arc::new(ScriptedRunner::succeeding(tmp.path()));
    let declined = controller(tmp.path(), Arc::new(DenyConfirmer), runner.clone())
        .run_protected(OperationKind::Verify, &paths, &OperationOptions::default())
        .await
        .expect("run should succeed");
    assert_eq!(declined.status, OutcomeStatus::Cancelled);
    assert_eq!(runner.invocation_count(), 0);

    let approved = controller(tmp.path(), Arc::new(DenyConfirmer), runner.clone())
        .run_protected(
            OperationKind::Verify,
            &paths,
            &OperationOptions {
                pre_authorized: true,
                ..OperationOptions::default()
            },
        )
        .await
        .expect("run should succeed");
    assert_completed(&approved);
    assert_eq!(runner.invocation_count(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn run_protected_snapshot_opt_out_failure_expected_residual_without_rollback() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    write_tree(tmp.path());

    let runner = Arc::new(ScriptedRunner::failing(tmp.path()));
    let confirmer = Arc::new(QueueConfirmer::with_answers([true]));
    let controller = controller(tmp.path(), confirmer, runner);

    let outcome = controller
        .run_protected(
            OperationKind::Format,
            &source_paths(),
            &OperationOptions {
                skip_snapshot: true,
                ..OperationOptions::default()
            },
        )
        .await
        .expect("run should succeed");

    assert_completed(&outcome);
    assert_eq!(outcome.snapshot_id, None);
    assert!(!outcome.rollback_performed);
    assert!(outcome.residual_failure);
    // Without a baseline the verifier can only warn.
    assert_eq!(outcome.verdict, Some(Verdict::Warned));
}
