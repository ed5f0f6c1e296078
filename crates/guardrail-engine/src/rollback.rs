use crate::errors::{RollbackError, RollbackResultOf};
use crate::snapshot::{SnapshotStore, mtime_ms};
use crate::types::{OperationKind, RollbackMode, RollbackPlan, RollbackResult, SnapshotMetadata};
use glob::Pattern;
use std::fs;

/// Restores files from a snapshot back into the live target root.
///
/// Stored copies are re-hashed against the snapshot metadata before any
/// file is written, so a corrupted snapshot aborts with the live tree
/// untouched. A best-effort pre-rollback snapshot makes the rollback
/// itself undoable; its failure is logged, never fatal.
pub struct RollbackEngine {
    store: SnapshotStore,
}

impl RollbackEngine {
    pub fn new(store: SnapshotStore) -> Self {
        Self { store }
    }

    pub fn rollback(&self, plan: &RollbackPlan) -> RollbackResultOf<RollbackResult> {
        let metadata = self
            .store
            .find(&plan.snapshot_id)
            .map_err(|error| RollbackError::IoFailure(error.to_string()))?
            .ok_or_else(|| RollbackError::SnapshotNotFound(plan.snapshot_id.clone()))?;

        let patterns = compile_patterns(plan)?;
        let selected = self.verify_stored_copies(&metadata, &patterns)?;

        match self.store.create_full(OperationKind::Unknown, None) {
            Ok(pre) => {
                tracing::info!(snapshot = %pre.id, "created pre-rollback snapshot");
            }
            Err(error) => {
                tracing::warn!(%error, "pre-rollback snapshot failed, continuing");
            }
        }

        let mut result = RollbackResult::default();
        for (relative, content) in selected {
            let destination = self.store.target_root().join(&relative);
            let newer_than_snapshot = destination.exists()
                && mtime_ms(&destination).is_some_and(|mtime| mtime > metadata.created_at_ms);
            if newer_than_snapshot && !plan.force_overwrite_newer {
                result.files_skipped.push(relative);
                continue;
            }

            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent).map_err(|error| {
                    RollbackError::IoFailure(format!(
                        "create '{}' failed: {error}",
                        parent.display()
                    ))
                })?;
            }
            fs::write(&destination, &content).map_err(|error| {
                RollbackError::IoFailure(format!(
                    "restore '{}' failed: {error}",
                    destination.display()
                ))
            })?;
            result.files_restored.push(relative);
        }

        tracing::info!(
            snapshot = %metadata.id,
            path = %self.store.snapshots_dir().join(&metadata.id).display(),
            restored = result.files_restored.len(),
            skipped = result.files_skipped.len(),
            "rollback complete"
        );
        Ok(result)
    }

    /// Read and hash-check every selected stored copy before touching the
    /// live tree. A path recorded in metadata but absent on disk is a
    /// no-op; a hash mismatch is a hard error.
    fn verify_stored_copies(
        &self,
        metadata: &SnapshotMetadata,
        patterns: &[Pattern],
    ) -> RollbackResultOf<Vec<(String, Vec<u8>)>> {
        let files_dir = self.store.files_dir(&metadata.id);
        let mut selected = Vec::new();
        for (relative, record) in &metadata.files {
            if !patterns.is_empty() && !patterns.iter().any(|p| p.matches(relative)) {
                continue;
            }
            let stored = files_dir.join(relative);
            if !stored.exists() {
                continue;
            }
            let content = fs::read(&stored).map_err(|error| {
                RollbackError::IoFailure(format!("read '{}' failed: {error}", stored.display()))
            })?;
            if blake3::hash(&content).to_hex().to_string() != record.blake3 {
                return Err(RollbackError::InvalidMetadata {
                    id: metadata.id.clone(),
                    detail: format!("stored copy of '{relative}' does not match recorded hash"),
                });
            }
            selected.push((relative.clone(), content));
        }
        Ok(selected)
    }
}

fn compile_patterns(plan: &RollbackPlan) -> RollbackResultOf<Vec<Pattern>> {
    if plan.mode == RollbackMode::Full {
        return Ok(Vec::new());
    }
    plan.patterns
        .iter()
        .map(|raw| {
            Pattern::new(raw).map_err(|error| {
                RollbackError::InvalidMetadata {
                    id: plan.snapshot_id.clone(),
                    detail: format!("invalid glob pattern '{raw}': {error}"),
                }
            })
        })
        .collect()
}
