use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub type SnapshotId = String;

/// The kind of destructive quality operation being guarded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Format,
    Cleanup,
    Dedupe,
    Verify,
    Unknown,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Format => "format",
            OperationKind::Cleanup => "cleanup",
            OperationKind::Dedupe => "dedupe",
            OperationKind::Verify => "verify",
            OperationKind::Unknown => "unknown",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "format" => OperationKind::Format,
            "cleanup" => OperationKind::Cleanup,
            "dedupe" => OperationKind::Dedupe,
            "verify" => OperationKind::Verify,
            _ => OperationKind::Unknown,
        }
    }
}

/// Categorical risk bucket derived from a numeric score; ordered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// Result of a risk assessment; immutable once returned.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub kind: OperationKind,
    pub score: u32,
    pub level: RiskLevel,
    /// Human-readable contributing factors, in rule-application order.
    pub factors: Vec<String>,
}

/// Repository state supplied by the caller's VCS query.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoState {
    pub has_uncommitted_changes: bool,
    pub current_commit: Option<String>,
    pub current_branch: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    Full,
    Differential,
}

/// Size and content hash of one stored file copy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub bytes: u64,
    pub blake3: String,
}

/// Persisted per-snapshot record; written once at creation, never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub id: SnapshotId,
    /// Unix epoch milliseconds at creation start.
    pub created_at_ms: u64,
    pub operation: OperationKind,
    pub target_root: PathBuf,
    pub kind: SnapshotKind,
    pub base_snapshot_id: Option<SnapshotId>,
    pub file_count: usize,
    pub total_bytes: u64,
    pub vcs_commit: Option<String>,
    pub vcs_branch: Option<String>,
    /// Relative path -> stored copy record. BTreeMap keeps the on-disk
    /// JSON deterministic.
    pub files: BTreeMap<String, FileRecord>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Warned,
    Failed,
}

/// Outcome of one integrity verification pass. Not persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl IntegrityReport {
    pub fn verdict(&self) -> Verdict {
        if !self.errors.is_empty() {
            Verdict::Failed
        } else if !self.warnings.is_empty() {
            Verdict::Warned
        } else {
            Verdict::Passed
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackMode {
    Full,
    Selective,
}

/// Input to the rollback engine; not persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RollbackPlan {
    pub snapshot_id: SnapshotId,
    pub mode: RollbackMode,
    /// Glob patterns over snapshot-relative paths; selective mode only.
    pub patterns: Vec<String>,
    /// Overwrite destination files whose mtime is newer than the snapshot.
    pub force_overwrite_newer: bool,
}

impl RollbackPlan {
    pub fn full(snapshot_id: impl Into<SnapshotId>) -> Self {
        Self {
            snapshot_id: snapshot_id.into(),
            mode: RollbackMode::Full,
            patterns: Vec::new(),
            force_overwrite_newer: false,
        }
    }

    pub fn selective<I, S>(snapshot_id: impl Into<SnapshotId>, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            snapshot_id: snapshot_id.into(),
            mode: RollbackMode::Selective,
            patterns: patterns.into_iter().map(Into::into).collect(),
            force_overwrite_newer: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RollbackResult {
    pub files_restored: Vec<String>,
    pub files_skipped: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationLevel {
    Basic,
    Standard,
    Comprehensive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutcomeStatus {
    Completed,
    /// User declined, or the emergency-stop marker was present. Not an error.
    Cancelled,
}

/// What `run_protected` hands back to the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationOutcome {
    pub status: OutcomeStatus,
    pub verdict: Option<Verdict>,
    pub rollback_performed: bool,
    pub snapshot_id: Option<SnapshotId>,
    /// True when the external operation reported failure or verification
    /// failed and the rollback offer was declined.
    pub residual_failure: bool,
}

/// Caller-supplied, immutable per-invocation options. Replaces the
/// ambient environment flags of older tooling.
#[derive(Clone, Debug)]
pub struct OperationOptions {
    /// Skip the confirmation gate regardless of risk level.
    pub pre_authorized: bool,
    /// Proceed without a snapshot. Logged loudly; rollback is then
    /// impossible for this operation.
    pub skip_snapshot: bool,
    /// Base snapshot id for a differential snapshot instead of a full one.
    pub differential_base: Option<SnapshotId>,
    pub verification_level: VerificationLevel,
}

impl Default for OperationOptions {
    fn default() -> Self {
        Self {
            pre_authorized: false,
            skip_snapshot: false,
            differential_base: None,
            verification_level: VerificationLevel::Standard,
        }
    }
}
