// lock.rs — Advisory per-workspace lockfile.
//
// The metadata directory is not safe for concurrent invocations. A lock
// file holding the PID and host is created with O_EXCL at operation start
// and removed on drop. A pre-existing lock is reported with its holder;
// stale locks are never broken automatically.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WorkspaceError;
use crate::layout::Layout;

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    hostname: String,
    acquired_at: DateTime<Utc>,
}

/// Held for the duration of one engine operation; released on drop.
#[derive(Debug)]
pub struct WorkspaceLock {
    path: PathBuf,
}

impl WorkspaceLock {
    pub fn acquire(layout: &Layout, hostname: &str) -> Result<Self, WorkspaceError> {
        let path = layout.lock_file();
        let result = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path);
        match result {
            Ok(mut file) => {
                let info = LockInfo {
                    pid: std::process::id(),
                    hostname: hostname.to_string(),
                    acquired_at: Utc::now(),
                };
                let bytes = serde_json::to_vec_pretty(&info)?;
                file.write_all(&bytes)
                    .map_err(WorkspaceError::io(path.clone()))?;
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder: LockInfo = crate::store::read_json(&path)?;
                Err(WorkspaceError::Locked {
                    pid: holder.pid,
                    hostname: holder.hostname,
                    path,
                })
            }
            Err(source) => Err(WorkspaceError::IoError { path, source }),
        }
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        // Releasing a lock that was already removed by hand is fine.
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_reports_holder() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.create_skeleton().unwrap();

        let lock = WorkspaceLock::acquire(&layout, "hostA").unwrap();
        match WorkspaceLock::acquire(&layout, "hostA") {
            Err(WorkspaceError::Locked { pid, hostname, .. }) => {
                assert_eq!(pid, std::process::id());
                assert_eq!(hostname, "hostA");
            }
            other => panic!("expected Locked, got {:?}", other.map(|_| ())),
        }
        drop(lock);
        // Released on drop; can be re-acquired.
        WorkspaceLock::acquire(&layout, "hostA").unwrap();
    }
}
