// git.rs — Managed git repository backend.
//
// The snapshot identity is the full commit hash of HEAD after pending
// changes (untracked files included) are auto-committed. Restore is
// `reset --hard <commit>`, which destroys the working copy; the restore
// precheck refuses while uncaptured changes exist. Push/pull/clone are
// native git operations.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::info;

use dw_hashtree::{hash_str, ExcludeSet};
use dw_workspace::{ManifestEntry, Role};

use crate::adaptor::{
    ResourceAdaptor, RotatingResource, SnapshotOutcome, SyncedResource,
};
use crate::error::ResourceError;
use crate::gitcmd::GitRunner;
use crate::rotate;

pub struct ManagedGitResource {
    name: String,
    role: Role,
    read_only: bool,
    local_path: PathBuf,
    remote_url: Option<String>,
    runner: GitRunner,
}

impl ManagedGitResource {
    pub fn new(
        name: impl Into<String>,
        role: Role,
        read_only: bool,
        local_path: impl Into<PathBuf>,
        remote_url: Option<String>,
    ) -> Self {
        let local_path = local_path.into();
        Self {
            name: name.into(),
            role,
            read_only,
            runner: GitRunner::new(&local_path),
            local_path,
            remote_url,
        }
    }

    fn require_repo(&self) -> Result<(), ResourceError> {
        if !self.runner.is_repo()? {
            return Err(ResourceError::Precondition {
                resource: self.name.clone(),
                message: format!("{} is not a git repository", self.local_path.display()),
            });
        }
        Ok(())
    }

    fn has_upstream(&self) -> Result<bool, ResourceError> {
        Ok(self.remote_url.is_some() || self.runner.remote_url("origin")?.is_some())
    }
}

impl ResourceAdaptor for ManagedGitResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> Role {
        self.role
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    fn kind(&self) -> &'static str {
        "git"
    }

    fn local_path(&self) -> Option<&Path> {
        Some(&self.local_path)
    }

    fn dirty(&self) -> Result<bool, ResourceError> {
        self.runner.is_dirty(None)
    }

    fn current_state(&self) -> Result<String, ResourceError> {
        let head = if self.runner.has_commits()? {
            self.runner.head_commit()?
        } else {
            String::from("unborn")
        };
        let status = self.runner.status_porcelain(None)?;
        if status.is_empty() {
            // Clean: the state IS the commit, directly comparable to a
            // recorded snapshot hash.
            Ok(head)
        } else {
            // Fold the porcelain status in so any working-copy change
            // shifts the fingerprint.
            Ok(hash_str(&format!("{}\n{}", head, status)))
        }
    }

    fn precheck_snapshot(&self) -> Result<(), ResourceError> {
        self.require_repo()?;
        if self.read_only && self.runner.is_dirty(None)? {
            return Err(ResourceError::ReadOnly {
                resource: self.name.clone(),
                operation: "auto-commit local modifications".to_string(),
            });
        }
        Ok(())
    }

    fn snapshot(&mut self) -> Result<SnapshotOutcome, ResourceError> {
        if !self.read_only {
            let committed = self
                .runner
                .commit_all(None, &format!("snapshot of resource {}", self.name))?;
            if committed {
                info!(resource = %self.name, "auto-committed pending changes");
            }
        }
        let commit = self.runner.head_commit()?;
        Ok(SnapshotOutcome::with_token(
            commit.clone(),
            serde_json::json!(commit),
        ))
    }

    fn precheck_restore(&self, entry: &ManifestEntry) -> Result<(), ResourceError> {
        self.require_repo()?;
        let commit = &entry.hash;
        if !self.runner.object_exists(commit)? {
            return Err(ResourceError::NotRestorable {
                resource: self.name.clone(),
                reason: format!("commit {} is not present locally; pull first", commit),
            });
        }
        if self.read_only && self.runner.head_commit()? != *commit {
            return Err(ResourceError::ReadOnly {
                resource: self.name.clone(),
                operation: format!("reset to {}", commit),
            });
        }
        if self.runner.is_dirty(None)? {
            return Err(ResourceError::Dirty {
                resource: self.name.clone(),
                details: "working copy has uncommitted changes".to_string(),
            });
        }
        Ok(())
    }

    fn restore(&mut self, entry: &ManifestEntry) -> Result<(), ResourceError> {
        if self.read_only {
            // precheck verified HEAD already matches.
            return Ok(());
        }
        info!(resource = %self.name, commit = %entry.hash, "reset --hard");
        self.runner.reset_hard(&entry.hash)
    }

    fn diff(
        &self,
        from: &ManifestEntry,
        to: &ManifestEntry,
    ) -> Result<BTreeSet<String>, ResourceError> {
        Ok(self
            .runner
            .changed_paths(&from.hash, &to.hash, None)?
            .into_iter()
            .collect())
    }

    fn as_synced(&mut self) -> Option<&mut dyn SyncedResource> {
        Some(self)
    }

    fn as_rotating(&mut self) -> Option<&mut dyn RotatingResource> {
        Some(self)
    }
}

impl SyncedResource for ManagedGitResource {
    fn push(&mut self) -> Result<(), ResourceError> {
        if self.read_only || !self.has_upstream()? {
            return Ok(());
        }
        self.runner.fetch()?;
        match self.runner.ahead_behind("@{upstream}") {
            Ok((remote_ahead, _)) if remote_ahead > 0 => {
                return Err(ResourceError::Precondition {
                    resource: self.name.clone(),
                    message: format!(
                        "remote is ahead by {} commit(s); pull before pushing",
                        remote_ahead
                    ),
                });
            }
            // No upstream branch yet: the push below creates it.
            Ok(_) | Err(ResourceError::Subprocess { .. }) => {}
            Err(other) => return Err(other),
        }
        self.runner.push()
    }

    fn pull(&mut self) -> Result<(), ResourceError> {
        if !self.has_upstream()? {
            return Ok(());
        }
        self.runner.fetch()?;
        self.runner.pull_ff_only()
    }

    fn clone_to(&self, target: &Path) -> Result<(), ResourceError> {
        let url = self
            .remote_url
            .clone()
            .or(self.runner.remote_url("origin").unwrap_or(None))
            .ok_or_else(|| ResourceError::Precondition {
                resource: self.name.clone(),
                message: "no remote configured; cannot clone".to_string(),
            })?;
        GitRunner::clone_repo(&url, target)
    }
}

impl RotatingResource for ManagedGitResource {
    fn rotate_results(
        &mut self,
        rel_dest_root: &str,
        exclude_files: &BTreeSet<String>,
        excludes: &ExcludeSet,
    ) -> Result<Vec<(String, String)>, ResourceError> {
        // Untracked files are moved too; the auto-commit in snapshot()
        // then captures the rotated tree.
        rotate::move_current_files(
            &self.name,
            &self.local_path,
            rel_dest_root,
            exclude_files,
            excludes,
        )
    }

    fn unrotate_results(&mut self, moved: &[(String, String)]) -> Result<(), ResourceError> {
        rotate::undo_moves(&self.local_path, moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Set up a git repo with committer identity; None when git is not
    /// installed (the rest of the test is skipped).
    fn init_repo(dir: &Path) -> Option<GitRunner> {
        let runner = GitRunner::new(dir);
        match runner.init() {
            Ok(()) => {}
            Err(ResourceError::ToolMissing { .. }) => return None,
            Err(e) => panic!("git init failed: {e}"),
        }
        runner.run(&["config", "user.email", "tests@example.com"]).unwrap();
        runner.run(&["config", "user.name", "Tests"]).unwrap();
        Some(runner)
    }

    fn entry(hash: &str) -> ManifestEntry {
        ManifestEntry {
            name: "repo".into(),
            hash: hash.to_string(),
            token: Some(serde_json::json!(hash)),
        }
    }

    #[test]
    fn snapshot_commits_and_restore_resets() {
        let dir = tempfile::tempdir().unwrap();
        let Some(runner) = init_repo(dir.path()) else {
            return;
        };
        std::fs::write(dir.path().join("t.py"), "print('a')").unwrap();
        runner.commit_all(None, "initial").unwrap();

        let mut resource =
            ManagedGitResource::new("repo", Role::Code, false, dir.path(), None);
        let v1 = resource.snapshot().unwrap();

        // Edit without committing; snapshot auto-commits.
        std::fs::write(dir.path().join("t.py"), "print('a')\n#x").unwrap();
        assert!(resource.dirty().unwrap());
        let v2 = resource.snapshot().unwrap();
        assert_ne!(v1.hash, v2.hash);
        assert!(!resource.dirty().unwrap());

        resource.precheck_restore(&entry(&v1.hash)).unwrap();
        resource.restore(&entry(&v1.hash)).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("t.py")).unwrap(),
            "print('a')"
        );

        let changed = resource.diff(&entry(&v1.hash), &entry(&v2.hash)).unwrap();
        assert!(changed.contains("t.py"));
    }

    #[test]
    fn restore_precheck_refuses_unknown_commit_and_dirty_tree() {
        let dir = tempfile::tempdir().unwrap();
        let Some(runner) = init_repo(dir.path()) else {
            return;
        };
        std::fs::write(dir.path().join("f"), "1").unwrap();
        runner.commit_all(None, "initial").unwrap();

        let mut resource =
            ManagedGitResource::new("repo", Role::Code, false, dir.path(), None);
        let v1 = resource.snapshot().unwrap();

        let bogus = entry(&"0".repeat(40));
        assert!(matches!(
            resource.precheck_restore(&bogus),
            Err(ResourceError::NotRestorable { .. })
        ));

        std::fs::write(dir.path().join("f"), "dirty").unwrap();
        assert!(matches!(
            resource.precheck_restore(&entry(&v1.hash)),
            Err(ResourceError::Dirty { .. })
        ));
    }

    #[test]
    fn current_state_tracks_working_copy_edits() {
        let dir = tempfile::tempdir().unwrap();
        let Some(runner) = init_repo(dir.path()) else {
            return;
        };
        std::fs::write(dir.path().join("f"), "1").unwrap();
        runner.commit_all(None, "initial").unwrap();

        let resource = ManagedGitResource::new("repo", Role::Code, false, dir.path(), None);
        let clean = resource.current_state().unwrap();
        std::fs::write(dir.path().join("f"), "2").unwrap();
        assert_ne!(resource.current_state().unwrap(), clean);
    }
}
