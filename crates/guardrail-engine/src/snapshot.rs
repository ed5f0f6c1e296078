use crate::classify::PathClassifier;
use crate::config::EngineConfig;
use crate::errors::{SnapshotError, SnapshotResult};
use crate::types::{
    FileRecord, OperationKind, RepoState, SnapshotId, SnapshotKind, SnapshotMetadata,
};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

pub const METADATA_FILE_NAME: &str = "metadata.json";
const FILES_DIR_NAME: &str = "files";
const STAGING_PREFIX: &str = ".staging-";

// Build and vendor trees are never snapshotted.
const SKIPPED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "__pycache__",
    "vendor",
    "dist",
    "build",
];

/// Append-only store of immutable tree snapshots under
/// `<target_root>/<reserved>/snapshots/<id>/`.
///
/// Creation is all-or-nothing: files are copied into a staging directory,
/// metadata is written last, and a single rename publishes the snapshot.
/// A directory without `metadata.json` is an aborted partial and is never
/// listed.
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    target_root: PathBuf,
    reserved_dir: String,
    classifier: PathClassifier,
}

impl SnapshotStore {
    pub fn new(target_root: impl Into<PathBuf>, config: &EngineConfig) -> Self {
        Self {
            target_root: target_root.into(),
            reserved_dir: config.reserved_dir.clone(),
            classifier: PathClassifier::new(config),
        }
    }

    pub fn target_root(&self) -> &Path {
        &self.target_root
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.target_root
            .join(&self.reserved_dir)
            .join("snapshots")
    }

    /// Mirror tree holding the stored copies of one snapshot.
    pub fn files_dir(&self, id: &str) -> PathBuf {
        self.snapshots_dir().join(id).join(FILES_DIR_NAME)
    }

    pub fn create_full(
        &self,
        operation: OperationKind,
        repo: Option<&RepoState>,
    ) -> SnapshotResult<SnapshotMetadata> {
        self.create(operation, None, repo)
    }

    /// Snapshot only files modified strictly after the base snapshot was
    /// created. A missing or unreadable base degrades to a full snapshot.
    pub fn create_differential(
        &self,
        operation: OperationKind,
        base_snapshot_id: &str,
        repo: Option<&RepoState>,
    ) -> SnapshotResult<SnapshotMetadata> {
        match self.find(base_snapshot_id)? {
            Some(base) => self.create(operation, Some(base), repo),
            None => {
                tracing::warn!(
                    base = base_snapshot_id,
                    "differential base not found, degrading to full snapshot"
                );
                self.create(operation, None, repo)
            }
        }
    }

    /// All snapshots for this root, newest first.
    pub fn list(&self) -> SnapshotResult<Vec<SnapshotMetadata>> {
        let dir = self.snapshots_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(SnapshotError::IoFailure(format!(
                    "read snapshots dir '{}' failed: {error}",
                    dir.display()
                )));
            }
        };

        let mut snapshots = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|error| {
                SnapshotError::IoFailure(format!("read snapshots dir entry failed: {error}"))
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(STAGING_PREFIX) {
                continue;
            }
            match self.read_metadata(&entry.path()) {
                Ok(metadata) => snapshots.push(metadata),
                Err(error) => {
                    tracing::warn!(snapshot = %name, %error, "skipping unreadable snapshot");
                }
            }
        }
        snapshots.sort_by(|a, b| {
            b.created_at_ms
                .cmp(&a.created_at_ms)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(snapshots)
    }

    pub fn find(&self, id: &str) -> SnapshotResult<Option<SnapshotMetadata>> {
        let dir = self.snapshots_dir().join(id);
        if !dir.join(METADATA_FILE_NAME).exists() {
            return Ok(None);
        }
        self.read_metadata(&dir).map(Some)
    }

    /// Delete all but the `retain_count` most recent snapshots. A snapshot
    /// that is the base of a retained differential is never deleted.
    /// Leftover staging directories are swept as well.
    pub fn prune(&self, retain_count: usize) -> SnapshotResult<Vec<SnapshotId>> {
        let snapshots = self.list()?;
        let retained: Vec<&SnapshotMetadata> = snapshots.iter().take(retain_count).collect();
        let candidates: Vec<&SnapshotMetadata> = snapshots.iter().skip(retain_count).collect();
        self.delete_candidates(&retained, &candidates)
    }

    /// Delete snapshots older than `max_age`, with the same base-protection
    /// rule as `prune`.
    pub fn prune_older_than(&self, max_age: Duration) -> SnapshotResult<Vec<SnapshotId>> {
        let cutoff_ms = now_ms().saturating_sub(max_age.as_millis() as u64);
        let snapshots = self.list()?;
        let (retained, candidates): (Vec<&SnapshotMetadata>, Vec<&SnapshotMetadata>) = snapshots
            .iter()
            .partition(|snapshot| snapshot.created_at_ms >= cutoff_ms);
        self.delete_candidates(&retained, &candidates)
    }

    /// Delete one snapshot by id. Refuses while another snapshot still
    /// references it as a differential base.
    pub fn delete(&self, id: &str) -> SnapshotResult<()> {
        if self.find(id)?.is_none() {
            return Err(SnapshotError::NotFound(id.to_string()));
        }
        let snapshots = self.list()?;
        if let Some(dependent) = snapshots
            .iter()
            .find(|snapshot| snapshot.base_snapshot_id.as_deref() == Some(id))
        {
            return Err(SnapshotError::BaseInUse {
                base: id.to_string(),
                dependent: dependent.id.clone(),
            });
        }

        let dir = self.snapshots_dir().join(id);
        fs::remove_dir_all(&dir).map_err(|error| {
            SnapshotError::IoFailure(format!(
                "delete snapshot '{}' failed: {error}",
                dir.display()
            ))
        })?;
        tracing::info!(snapshot = id, path = %dir.display(), "deleted snapshot");
        Ok(())
    }

    fn delete_candidates(
        &self,
        retained: &[&SnapshotMetadata],
        candidates: &[&SnapshotMetadata],
    ) -> SnapshotResult<Vec<SnapshotId>> {
        // Candidates arrive newest-first and a base is always older than
        // its differential, so one pass with a growing set protects whole
        // chains: keeping a differential protects its base before the base
        // itself comes up.
        let mut protected: HashSet<SnapshotId> = retained
            .iter()
            .filter_map(|snapshot| snapshot.base_snapshot_id.clone())
            .collect();

        let mut deleted = Vec::new();
        for snapshot in candidates {
            if protected.contains(&snapshot.id) {
                if let Some(base) = &snapshot.base_snapshot_id {
                    protected.insert(base.clone());
                }
                tracing::debug!(snapshot = %snapshot.id, "retaining differential base");
                continue;
            }
            let dir = self.snapshots_dir().join(&snapshot.id);
            fs::remove_dir_all(&dir).map_err(|error| {
                SnapshotError::IoFailure(format!(
                    "delete snapshot '{}' failed: {error}",
                    dir.display()
                ))
            })?;
            tracing::info!(snapshot = %snapshot.id, path = %dir.display(), "pruned snapshot");
            deleted.push(snapshot.id.clone());
        }

        self.sweep_staging();
        Ok(deleted)
    }

    fn sweep_staging(&self) {
        let Ok(entries) = fs::read_dir(self.snapshots_dir()) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(STAGING_PREFIX) {
                let _ = fs::remove_dir_all(entry.path());
                tracing::warn!(dir = %name, "removed leftover staging directory");
            }
        }
    }

    fn create(
        &self,
        operation: OperationKind,
        base: Option<SnapshotMetadata>,
        repo: Option<&RepoState>,
    ) -> SnapshotResult<SnapshotMetadata> {
        let snapshots_dir = self.snapshots_dir();
        fs::create_dir_all(&snapshots_dir).map_err(|error| {
            SnapshotError::IoFailure(format!(
                "create snapshots dir '{}' failed: {error}",
                snapshots_dir.display()
            ))
        })?;

        let mut created_at_ms = now_ms();
        let id = loop {
            let candidate = format!("{}_{}", operation.as_str(), created_at_ms);
            if !snapshots_dir.join(&candidate).exists()
                && !snapshots_dir
                    .join(format!("{STAGING_PREFIX}{candidate}"))
                    .exists()
            {
                break candidate;
            }
            created_at_ms += 1;
        };

        let staging = snapshots_dir.join(format!("{STAGING_PREFIX}{id}"));
        let result = self.populate(&staging, &id, created_at_ms, operation, &base, repo);
        match result {
            Ok(metadata) => {
                fs::rename(&staging, snapshots_dir.join(&id)).map_err(|error| {
                    let _ = fs::remove_dir_all(&staging);
                    SnapshotError::PartialWrite {
                        id: id.clone(),
                        detail: format!("publish rename failed: {error}"),
                    }
                })?;
                tracing::info!(
                    snapshot = %metadata.id,
                    files = metadata.file_count,
                    bytes = metadata.total_bytes,
                    "created snapshot"
                );
                Ok(metadata)
            }
            Err(error) => {
                let _ = fs::remove_dir_all(&staging);
                Err(error)
            }
        }
    }

    fn populate(
        &self,
        staging: &Path,
        id: &str,
        created_at_ms: u64,
        operation: OperationKind,
        base: &Option<SnapshotMetadata>,
        repo: Option<&RepoState>,
    ) -> SnapshotResult<SnapshotMetadata> {
        let files_root = staging.join(FILES_DIR_NAME);
        fs::create_dir_all(&files_root).map_err(|error| SnapshotError::IoFailure(format!(
            "create staging dir '{}' failed: {error}",
            files_root.display()
        )))?;

        let mut files = BTreeMap::new();
        let mut total_bytes = 0u64;
        for (absolute, relative) in self.enumerate_files() {
            if let Some(base) = base {
                match mtime_ms(&absolute) {
                    Some(mtime) if mtime > base.created_at_ms => {}
                    _ => continue,
                }
            }

            let content = fs::read(&absolute).map_err(|error| SnapshotError::PartialWrite {
                id: id.to_string(),
                detail: format!("read '{}' failed: {error}", absolute.display()),
            })?;
            let destination = files_root.join(&relative);
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent).map_err(|error| SnapshotError::PartialWrite {
                    id: id.to_string(),
                    detail: format!("create '{}' failed: {error}", parent.display()),
                })?;
            }
            fs::write(&destination, &content).map_err(|error| SnapshotError::PartialWrite {
                id: id.to_string(),
                detail: format!("write '{}' failed: {error}", destination.display()),
            })?;

            total_bytes += content.len() as u64;
            files.insert(
                relative,
                FileRecord {
                    bytes: content.len() as u64,
                    blake3: blake3::hash(&content).to_hex().to_string(),
                },
            );
        }

        let metadata = SnapshotMetadata {
            id: id.to_string(),
            created_at_ms,
            operation,
            target_root: self.target_root.clone(),
            kind: if base.is_some() {
                SnapshotKind::Differential
            } else {
                SnapshotKind::Full
            },
            base_snapshot_id: base.as_ref().map(|b| b.id.clone()),
            file_count: files.len(),
            total_bytes,
            vcs_commit: repo.and_then(|r| r.current_commit.clone()),
            vcs_branch: repo.and_then(|r| r.current_branch.clone()),
            files,
        };

        let encoded = serde_json::to_vec_pretty(&metadata)
            .map_err(|error| SnapshotError::Serialization(error.to_string()))?;
        fs::write(staging.join(METADATA_FILE_NAME), encoded).map_err(|error| {
            SnapshotError::PartialWrite {
                id: id.to_string(),
                detail: format!("write metadata failed: {error}"),
            }
        })?;

        Ok(metadata)
    }

    fn enumerate_files(&self) -> Vec<(PathBuf, String)> {
        walk_source_files(&self.target_root, &self.reserved_dir, &self.classifier)
    }

    fn read_metadata(&self, snapshot_dir: &Path) -> SnapshotResult<SnapshotMetadata> {
        let path = snapshot_dir.join(METADATA_FILE_NAME);
        let raw = fs::read(&path).map_err(|error| {
            SnapshotError::IoFailure(format!("read '{}' failed: {error}", path.display()))
        })?;
        serde_json::from_slice(&raw)
            .map_err(|error| SnapshotError::Serialization(error.to_string()))
    }
}

/// Source/text files under `root`, as (absolute, relative) pairs. The
/// reserved directory and build trees are skipped; other dot-directories
/// (notably protected zones like `.claude`) are walked.
pub(crate) fn walk_source_files(
    root: &Path,
    reserved_dir: &str,
    classifier: &PathClassifier,
) -> Vec<(PathBuf, String)> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        if !entry.file_type().is_dir() {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        name != reserved_dir && !SKIPPED_DIRS.contains(&name.as_ref())
    });
    for entry in walker.flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !classifier.is_source_or_text(path) {
            continue;
        }
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        files.push((path.to_path_buf(), relative.to_string_lossy().into_owned()));
    }
    files
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

pub(crate) fn mtime_ms(path: &Path) -> Option<u64> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    modified
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|duration| duration.as_millis() as u64)
}
