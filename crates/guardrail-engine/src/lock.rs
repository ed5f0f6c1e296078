use crate::errors::LockError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const LOCK_FILE_NAME: &str = "lock";

#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    pid: u32,
    acquired_at_ms: u64,
}

/// Exclusive advisory lock for one target root, held from assessment to
/// completion. A concurrent acquire fails fast; a lock left by a dead
/// process is taken over.
#[derive(Debug)]
pub struct OperationLock {
    path: PathBuf,
}

impl OperationLock {
    pub fn acquire(target_root: &Path, reserved_dir: &str) -> Result<Self, LockError> {
        let dir = target_root.join(reserved_dir);
        fs::create_dir_all(&dir).map_err(|error| {
            LockError::IoFailure(format!("create '{}' failed: {error}", dir.display()))
        })?;
        let path = dir.join(LOCK_FILE_NAME);

        match try_create(&path) {
            Ok(()) => Ok(Self { path }),
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = read_holder(&path);
                match holder {
                    Some(pid) if process_is_alive(pid) => {
                        Err(LockError::OperationInProgress { pid })
                    }
                    _ => {
                        // Stale: holder is dead or the record is unreadable.
                        tracing::warn!(
                            path = %path.display(),
                            stale_pid = holder,
                            "taking over stale operation lock"
                        );
                        fs::remove_file(&path).map_err(|error| {
                            LockError::IoFailure(format!(
                                "remove stale lock '{}' failed: {error}",
                                path.display()
                            ))
                        })?;
                        match try_create(&path) {
                            Ok(()) => Ok(Self { path }),
                            Err(error) => Err(LockError::IoFailure(format!(
                                "reacquire lock '{}' failed: {error}",
                                path.display()
                            ))),
                        }
                    }
                }
            }
            Err(error) => Err(LockError::IoFailure(format!(
                "create lock '{}' failed: {error}",
                path.display()
            ))),
        }
    }
}

impl Drop for OperationLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn try_create(path: &Path) -> std::io::Result<()> {
    let record = LockRecord {
        pid: std::process::id(),
        acquired_at_ms: crate::snapshot::now_ms(),
    };
    let encoded = serde_json::to_vec_pretty(&record).unwrap_or_default();
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    let mut file = options.open(path)?;
    use std::io::Write;
    file.write_all(&encoded)
}

fn read_holder(path: &Path) -> Option<u32> {
    let raw = fs::read(path).ok()?;
    serde_json::from_slice::<LockRecord>(&raw)
        .ok()
        .map(|record| record.pid)
}

#[cfg(unix)]
fn process_is_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

// Without a portable liveness probe, an existing lock is assumed live.
#[cfg(not(unix))]
fn process_is_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_twice_expected_operation_in_progress() {
        let tmp = tempfile::tempdir().expect("tempdir should be created");
        let _held = OperationLock::acquire(tmp.path(), ".guardrail")
            .expect("first acquire should succeed");

        let second = OperationLock::acquire(tmp.path(), ".guardrail");
        assert!(matches!(
            second,
            Err(LockError::OperationInProgress { pid }) if pid == std::process::id()
        ));
    }

    #[test]
    fn drop_expected_lock_released_for_next_acquire() {
        let tmp = tempfile::tempdir().expect("tempdir should be created");
        {
            let _held = OperationLock::acquire(tmp.path(), ".guardrail")
                .expect("first acquire should succeed");
        }
        let _again = OperationLock::acquire(tmp.path(), ".guardrail")
            .expect("reacquire after drop should succeed");
    }

    #[cfg(unix)]
    #[test]
    fn acquire_over_dead_holder_expected_stale_takeover() {
        let tmp = tempfile::tempdir().expect("tempdir should be created");
        let dir = tmp.path().join(".guardrail");
        fs::create_dir_all(&dir).expect("reserved dir should be created");
        // PIDs wrap far below this on Linux; treat it as a dead process.
        let record = LockRecord {
            pid: i32::MAX as u32,
            acquired_at_ms: 0,
        };
        fs::write(
            dir.join(LOCK_FILE_NAME),
            serde_json::to_vec(&record).expect("record should serialize"),
        )
        .expect("stale lock should write");

        let _taken = OperationLock::acquire(tmp.path(), ".guardrail")
            .expect("stale lock should be taken over");
    }

    #[test]
    fn acquire_unreadable_record_expected_takeover() {
        let tmp = tempfile::tempdir().expect("tempdir should be created");
        let dir = tmp.path().join(".guardrail");
        fs::create_dir_all(&dir).expect("reserved dir should be created");
        fs::write(dir.join(LOCK_FILE_NAME), "garbage").expect("garbage lock should write");

        let _taken = OperationLock::acquire(tmp.path(), ".guardrail")
            .expect("unreadable lock should be taken over");
    }
}
