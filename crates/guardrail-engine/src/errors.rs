use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io failure: {0}")]
    IoFailure(String),

    #[error("partial snapshot '{id}' removed after failed write: {detail}")]
    PartialWrite { id: String, detail: String },

    #[error("snapshot metadata serialization failed: {0}")]
    Serialization(String),

    #[error("snapshot not found: {0}")]
    NotFound(String),

    #[error("snapshot '{base}' is the base of differential '{dependent}' and cannot be pruned")]
    BaseInUse { base: String, dependent: String },
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;

#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("invalid snapshot metadata for '{id}': {detail}")]
    InvalidMetadata { id: String, detail: String },

    #[error("rollback io failure: {0}")]
    IoFailure(String),
}

pub type RollbackResultOf<T> = Result<T, RollbackError>;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("operation already in progress on this root (pid {pid})")]
    OperationInProgress { pid: u32 },

    #[error("lock io failure: {0}")]
    IoFailure(String),
}

/// Aggregate error surfaced by the controller API.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Rollback(#[from] RollbackError),

    #[error(transparent)]
    Lock(#[from] LockError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_in_use_message_expected_names_both_snapshots() {
        let error = SnapshotError::BaseInUse {
            base: "format_1".to_string(),
            dependent: "format_2".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "snapshot 'format_1' is the base of differential 'format_2' and cannot be pruned"
        );
    }

    #[test]
    fn engine_error_wraps_lock_error_expected_transparent_message() {
        let error = EngineError::from(LockError::OperationInProgress { pid: 42 });
        assert_eq!(
            error.to_string(),
            "operation already in progress on this root (pid 42)"
        );
    }
}
