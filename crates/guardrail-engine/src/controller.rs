use crate::classify::PathClassifier;
use crate::config::EngineConfig;
use crate::confirm::Confirmer;
use crate::errors::EngineError;
use crate::lock::OperationLock;
use crate::risk::RiskAssessor;
use crate::rollback::RollbackEngine;
use crate::snapshot::SnapshotStore;
use crate::types::{
    OperationKind, OperationOptions, OperationOutcome, OutcomeStatus, RepoState, RiskLevel,
    RollbackPlan, Verdict,
};
use crate::verify::{IntegrityVerifier, SyntaxChecker};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const EMERGENCY_STOP_FILE_NAME: &str = "EMERGENCY_STOP";

/// VCS state query, typically git-backed. Supplied by the caller.
#[async_trait]
pub trait RepoStateProvider: Send + Sync {
    async fn repo_state(&self, target_root: &Path) -> RepoState;
}

/// Fixed repo state; for callers without a VCS and for tests.
#[derive(Clone, Debug, Default)]
pub struct StaticRepoState(pub RepoState);

#[async_trait]
impl RepoStateProvider for StaticRepoState {
    async fn repo_state(&self, _target_root: &Path) -> RepoState {
        self.0.clone()
    }
}

/// The actual format/cleanup/dedupe logic, invoked exactly once between
/// snapshotting and verification. Returns whether it reports success.
#[async_trait]
pub trait OperationRunner: Send + Sync {
    async fn perform(&self, kind: OperationKind, paths: &[PathBuf]) -> bool;
}

/// Caller-supplied collaborator seams for one controller.
pub struct Collaborators {
    pub repo_state: Arc<dyn RepoStateProvider>,
    pub confirmer: Arc<dyn Confirmer>,
    pub runner: Arc<dyn OperationRunner>,
    pub syntax: Arc<dyn SyntaxChecker>,
}

/// Orchestrates one protected operation: assess risk, gate on
/// confirmation, snapshot (fail-closed), let the caller mutate, verify,
/// and offer rollback on failure.
///
/// A per-root advisory lock is held from assessment to completion; a
/// concurrent invocation on the same root fails fast.
pub struct OperationSafetyController {
    target_root: PathBuf,
    config: EngineConfig,
    store: SnapshotStore,
    assessor: RiskAssessor,
    verifier: IntegrityVerifier,
    classifier: PathClassifier,
    collaborators: Collaborators,
}

impl OperationSafetyController {
    pub fn new(
        target_root: impl Into<PathBuf>,
        config: EngineConfig,
        collaborators: Collaborators,
    ) -> Self {
        let target_root = target_root.into();
        Self {
            store: SnapshotStore::new(&target_root, &config),
            assessor: RiskAssessor::new(config.risk),
            verifier: IntegrityVerifier::new(&config),
            classifier: PathClassifier::new(&config),
            target_root,
            config,
            collaborators,
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn rollback_engine(&self) -> RollbackEngine {
        RollbackEngine::new(self.store.clone())
    }

    pub async fn run_protected(
        &self,
        kind: OperationKind,
        paths: &[PathBuf],
        options: &OperationOptions,
    ) -> Result<OperationOutcome, EngineError> {
        let stop_marker = self
            .target_root
            .join(&self.config.reserved_dir)
            .join(EMERGENCY_STOP_FILE_NAME);
        if stop_marker.exists() {
            tracing::warn!(marker = %stop_marker.display(), "emergency stop marker present, refusing to run");
            return Ok(cancelled_outcome());
        }

        let _lock = OperationLock::acquire(&self.target_root, &self.config.reserved_dir)?;

        let repo = self
            .collaborators
            .repo_state
            .repo_state(&self.target_root)
            .await;
        let assessment = self.assessor.assess(kind, paths, &repo);
        tracing::debug!(
            kind = kind.as_str(),
            score = assessment.score,
            level = assessment.level.as_str(),
            "risk assessed"
        );

        // Protected-zone targets always go through the gate, even at Low.
        let touches_protected = paths.iter().any(|path| self.classifier.is_protected(path));
        if (assessment.level >= RiskLevel::Medium || touches_protected) && !options.pre_authorized {
            let prompt = format!(
                "{} operation on {} path(s) under {}",
                kind.as_str(),
                paths.len(),
                self.target_root.display()
            );
            if !self
                .collaborators
                .confirmer
                .confirm(&prompt, &assessment)
                .await
            {
                tracing::info!(kind = kind.as_str(), "operation cancelled before snapshot");
                return Ok(cancelled_outcome());
            }
        }

        let snapshot = if options.skip_snapshot {
            tracing::warn!(
                kind = kind.as_str(),
                "snapshot opt-out requested, proceeding without rollback protection"
            );
            None
        } else {
            // Fail-closed: a snapshot error aborts before any mutation.
            let metadata = match &options.differential_base {
                Some(base) => self.store.create_differential(kind, base, Some(&repo))?,
                None => self.store.create_full(kind, Some(&repo))?,
            };
            Some(metadata)
        };

        let mutation_succeeded = self.collaborators.runner.perform(kind, paths).await;

        // Verify even on reported failure; partial mutations must be seen.
        let report = self
            .verifier
            .verify(
                &self.target_root,
                snapshot.as_ref(),
                options.verification_level,
                self.collaborators.syntax.as_ref(),
            )
            .await;
        let verdict = report.verdict();
        for finding in report.errors.iter().chain(report.warnings.iter()) {
            tracing::debug!(finding, "verification finding");
        }

        let mut rollback_performed = false;
        let mut residual_failure = false;
        if !mutation_succeeded || verdict == Verdict::Failed {
            match &snapshot {
                Some(snapshot) => {
                    tracing::warn!(
                        snapshot = %snapshot.id,
                        path = %self.store.snapshots_dir().join(&snapshot.id).display(),
                        mutation_succeeded,
                        verdict = ?verdict,
                        "operation failed, offering rollback"
                    );
                    let prompt = format!(
                        "operation failed; roll back to snapshot {}?",
                        snapshot.id
                    );
                    if self
                        .collaborators
                        .confirmer
                        .confirm(&prompt, &assessment)
                        .await
                    {
                        let mut plan = RollbackPlan::full(snapshot.id.clone());
                        // The failed mutation is newer than the snapshot by
                        // definition; restore over it.
                        plan.force_overwrite_newer = true;
                        self.rollback_engine().rollback(&plan)?;
                        rollback_performed = true;
                    } else {
                        residual_failure = true;
                        tracing::error!(
                            snapshot = %snapshot.id,
                            "rollback declined; failed state left for manual recovery"
                        );
                    }
                }
                None => {
                    residual_failure = true;
                    tracing::error!("operation failed and no snapshot exists to roll back to");
                }
            }
        }

        Ok(OperationOutcome {
            status: OutcomeStatus::Completed,
            verdict: Some(verdict),
            rollback_performed,
            snapshot_id: snapshot.map(|metadata| metadata.id),
            residual_failure,
        })
    }
}

fn cancelled_outcome() -> OperationOutcome {
    OperationOutcome {
        status: OutcomeStatus::Cancelled,
        verdict: None,
        rollback_performed: false,
        snapshot_id: None,
        residual_failure: false,
    }
}
