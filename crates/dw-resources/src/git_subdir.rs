// git_subdir.rs — Subdirectory of the workspace's own git repository.
//
// The content hash is a tree digest over the subdirectory; the backend
// token is the workspace commit that contains that content. Restore
// checks the subdirectory's files out of that commit; push and pull
// piggy-back on the workspace repository, so this backend is not synced
// on its own.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::info;

use dw_hashtree::{hash_tree, ExcludeSet};
use dw_workspace::{ManifestEntry, Role};

use crate::adaptor::{ResourceAdaptor, RotatingResource, SnapshotOutcome};
use crate::error::ResourceError;
use crate::gitcmd::GitRunner;
use crate::rotate;

pub struct GitSubdirResource {
    name: String,
    role: Role,
    read_only: bool,
    subpath: String,
    abs_path: PathBuf,
    runner: GitRunner,
    excludes: ExcludeSet,
}

impl GitSubdirResource {
    pub fn new(
        name: impl Into<String>,
        role: Role,
        read_only: bool,
        workspace_root: &Path,
        subpath: impl Into<String>,
        excludes: ExcludeSet,
    ) -> Self {
        let subpath = subpath.into();
        Self {
            name: name.into(),
            role,
            read_only,
            abs_path: workspace_root.join(&subpath),
            runner: GitRunner::new(workspace_root),
            subpath,
            excludes,
        }
    }

    fn token_commit(&self, entry: &ManifestEntry) -> Result<String, ResourceError> {
        entry
            .token
            .as_ref()
            .and_then(|t| t.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ResourceError::BadToken {
                resource: self.name.clone(),
                reason: "expected a workspace commit id".to_string(),
            })
    }
}

impl ResourceAdaptor for GitSubdirResource {
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
        "git-subdir"
    }

    fn local_path(&self) -> Option<&Path> {
        Some(&self.abs_path)
    }

    fn dirty(&self) -> Result<bool, ResourceError> {
        self.runner.is_dirty(Some(&self.subpath))
    }

    fn current_state(&self) -> Result<String, ResourceError> {
        Ok(hash_tree(&self.abs_path, &self.excludes)?)
    }

    fn precheck_snapshot(&self) -> Result<(), ResourceError> {
        if !self.runner.is_repo()? {
            return Err(ResourceError::Precondition {
                resource: self.name.clone(),
                message: "workspace root is not a git repository".to_string(),
            });
        }
        if !self.abs_path.is_dir() {
            return Err(ResourceError::Precondition {
                resource: self.name.clone(),
                message: format!("subdirectory {} does not exist", self.subpath),
            });
        }
        Ok(())
    }

    fn snapshot(&mut self) -> Result<SnapshotOutcome, ResourceError> {
        if !self.read_only {
            self.runner.commit_all(
                Some(&self.subpath),
                &format!("snapshot of resource {}", self.name),
            )?;
        }
        let hash = hash_tree(&self.abs_path, &self.excludes)?;
        let commit = self.runner.head_commit()?;
        Ok(SnapshotOutcome::with_token(hash, serde_json::json!(commit)))
    }

    fn precheck_restore(&self, entry: &ManifestEntry) -> Result<(), ResourceError> {
        let commit = self.token_commit(entry)?;
        if !self.runner.object_exists(&commit)? {
            return Err(ResourceError::NotRestorable {
                resource: self.name.clone(),
                reason: format!("workspace commit {} is not present locally", commit),
            });
        }
        if self.read_only && self.current_state()? != entry.hash {
            return Err(ResourceError::ReadOnly {
                resource: self.name.clone(),
                operation: format!("check out {}", &commit),
            });
        }
        Ok(())
    }

    fn restore(&mut self, entry: &ManifestEntry) -> Result<(), ResourceError> {
        if self.read_only {
            return Ok(());
        }
        let commit = self.token_commit(entry)?;
        info!(resource = %self.name, %commit, subpath = %self.subpath, "checkout path");
        self.runner.checkout_path(&commit, &self.subpath)
    }

    fn diff(
        &self,
        from: &ManifestEntry,
        to: &ManifestEntry,
    ) -> Result<BTreeSet<String>, ResourceError> {
        let from_commit = self.token_commit(from)?;
        let to_commit = self.token_commit(to)?;
        Ok(self
            .runner
            .changed_paths(&from_commit, &to_commit, Some(&self.subpath))?
            .into_iter()
            .collect())
    }

    fn as_rotating(&mut self) -> Option<&mut dyn RotatingResource> {
        Some(self)
    }
}

impl RotatingResource for GitSubdirResource {
    fn rotate_results(
        &mut self,
        rel_dest_root: &str,
        exclude_files: &BTreeSet<String>,
        excludes: &ExcludeSet,
    ) -> Result<Vec<(String, String)>, ResourceError> {
        rotate::move_current_files(
            &self.name,
            &self.abs_path,
            rel_dest_root,
            exclude_files,
            excludes,
        )
    }

    fn unrotate_results(&mut self, moved: &[(String, String)]) -> Result<(), ResourceError> {
        rotate::undo_moves(&self.abs_path, moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn subdir_snapshot_and_path_restore() {
        let dir = tempfile::tempdir().unwrap();
        let Some(_runner) = init_repo(dir.path()) else {
            return;
        };
        let sub = dir.path().join("data");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join("d.csv"), "1,2,3").unwrap();

        let mut resource = GitSubdirResource::new(
            "data",
            Role::IntermediateData,
            false,
            dir.path(),
            "data",
            ExcludeSet::new([".git"]).unwrap(),
        );
        resource.precheck_snapshot().unwrap();
        let v1 = resource.snapshot().unwrap();
        assert!(v1.token.is_some());

        std::fs::write(sub.join("d.csv"), "9,9,9").unwrap();
        let v2 = resource.snapshot().unwrap();
        assert_ne!(v1.hash, v2.hash);

        let e1 = ManifestEntry {
            name: "data".into(),
            hash: v1.hash.clone(),
            token: v1.token.clone(),
        };
        resource.precheck_restore(&e1).unwrap();
        resource.restore(&e1).unwrap();
        assert_eq!(std::fs::read_to_string(sub.join("d.csv")).unwrap(), "1,2,3");
        assert_eq!(resource.current_state().unwrap(), v1.hash);

        let e2 = ManifestEntry {
            name: "data".into(),
            hash: v2.hash.clone(),
            token: v2.token.clone(),
        };
        let changed = resource.diff(&e1, &e2).unwrap();
        assert!(changed.contains("data/d.csv"));
    }
}
