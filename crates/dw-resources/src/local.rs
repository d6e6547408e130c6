// local.rs — Locally managed directory backend.
//
// No native history: the content hash is the tree digest, and restoring
// relies on the per-clone blob catalogue filled at snapshot time. The
// backend has no remote, so it is not synced.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use dw_hashtree::{ExcludeSet, FileIndex};
use dw_workspace::{ManifestEntry, Role};

use crate::adaptor::{ResourceAdaptor, RotatingResource, SnapshotOutcome};
use crate::blobcat::BlobCatalogue;
use crate::error::ResourceError;
use crate::rotate;

pub struct LocalFilesResource {
    name: String,
    role: Role,
    read_only: bool,
    local_path: PathBuf,
    catalogue: BlobCatalogue,
    excludes: ExcludeSet,
}

impl LocalFilesResource {
    pub fn new(
        name: impl Into<String>,
        role: Role,
        read_only: bool,
        local_path: impl Into<PathBuf>,
        index_dir: impl Into<PathBuf>,
        excludes: ExcludeSet,
    ) -> Self {
        let name = name.into();
        Self {
            catalogue: BlobCatalogue::new(name.clone(), index_dir),
            name,
            role,
            read_only,
            local_path: local_path.into(),
            excludes,
        }
    }

    fn capture(&self) -> Result<FileIndex, ResourceError> {
        Ok(FileIndex::capture(&self.local_path, &self.excludes)?)
    }

    fn index_for(&self, entry: &ManifestEntry) -> Result<FileIndex, ResourceError> {
        self.catalogue
            .load_index(&entry.hash)?
            .ok_or_else(|| ResourceError::NotRestorable {
                resource: self.name.clone(),
                reason: format!("no recorded file index for state {}", entry.hash),
            })
    }
}

impl ResourceAdaptor for LocalFilesResource {
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
        "file"
    }

    fn local_path(&self) -> Option<&Path> {
        Some(&self.local_path)
    }

    fn dirty(&self) -> Result<bool, ResourceError> {
        match self.catalogue.load_current()? {
            Some(current) => Ok(!current.verify(&self.local_path, &self.excludes)?.is_empty()),
            // Nothing captured yet: nothing a restore could lose.
            None => Ok(false),
        }
    }

    fn current_state(&self) -> Result<String, ResourceError> {
        Ok(self.capture()?.root_hash())
    }

    fn precheck_snapshot(&self) -> Result<(), ResourceError> {
        if !self.local_path.is_dir() {
            return Err(ResourceError::Precondition {
                resource: self.name.clone(),
                message: format!("{} does not exist", self.local_path.display()),
            });
        }
        Ok(())
    }

    fn snapshot(&mut self) -> Result<SnapshotOutcome, ResourceError> {
        let index = self.capture()?;
        let root_hash = self.catalogue.record_snapshot(&index, &self.local_path)?;
        Ok(SnapshotOutcome::hash_only(root_hash))
    }

    fn precheck_restore(&self, entry: &ManifestEntry) -> Result<(), ResourceError> {
        let index = self.index_for(entry)?;
        if self.read_only {
            if self.current_state()? != entry.hash {
                return Err(ResourceError::ReadOnly {
                    resource: self.name.clone(),
                    operation: "re-materialise files".to_string(),
                });
            }
            return Ok(());
        }
        self.catalogue.verify_restorable(&index, &self.local_path)
    }

    fn restore(&mut self, entry: &ManifestEntry) -> Result<(), ResourceError> {
        if self.read_only {
            return Ok(());
        }
        let index = self.index_for(entry)?;
        self.catalogue
            .materialize(&index, &self.local_path, &self.excludes)?;
        Ok(())
    }

    fn diff(
        &self,
        from: &ManifestEntry,
        to: &ManifestEntry,
    ) -> Result<BTreeSet<String>, ResourceError> {
        let from_index = self.index_for(from)?;
        let to_index = self.index_for(to)?;
        Ok(from_index.diff(&to_index).changed_paths().into_iter().collect())
    }

    fn as_rotating(&mut self) -> Option<&mut dyn RotatingResource> {
        Some(self)
    }
}

impl RotatingResource for LocalFilesResource {
    fn rotate_results(
        &mut self,
        rel_dest_root: &str,
        exclude_files: &BTreeSet<String>,
        excludes: &ExcludeSet,
    ) -> Result<Vec<(String, String)>, ResourceError> {
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

    fn resource(tree: &Path, meta: &Path) -> LocalFilesResource {
        LocalFilesResource::new(
            "files",
            Role::SourceData,
            false,
            tree,
            meta,
            ExcludeSet::empty(),
        )
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let tree = tempfile::tempdir().unwrap();
        let meta = tempfile::tempdir().unwrap();
        std::fs::write(tree.path().join("a.txt"), "alpha").unwrap();

        let mut r = resource(tree.path(), meta.path());
        r.precheck_snapshot().unwrap();
        let v1 = r.snapshot().unwrap();
        assert!(!r.dirty().unwrap());

        std::fs::write(tree.path().join("a.txt"), "beta").unwrap();
        assert!(r.dirty().unwrap());
        let v2 = r.snapshot().unwrap();
        assert_ne!(v1.hash, v2.hash);

        let e1 = ManifestEntry {
            name: "files".into(),
            hash: v1.hash.clone(),
            token: None,
        };
        r.precheck_restore(&e1).unwrap();
        r.restore(&e1).unwrap();
        assert_eq!(
            std::fs::read_to_string(tree.path().join("a.txt")).unwrap(),
            "alpha"
        );
        assert_eq!(r.current_state().unwrap(), v1.hash);

        let e2 = ManifestEntry {
            name: "files".into(),
            hash: v2.hash.clone(),
            token: None,
        };
        assert_eq!(
            r.diff(&e1, &e2).unwrap().into_iter().collect::<Vec<_>>(),
            vec!["a.txt".to_string()]
        );
    }

    #[test]
    fn deleted_file_marks_dirty_and_restore_brings_it_back() {
        let tree = tempfile::tempdir().unwrap();
        let meta = tempfile::tempdir().unwrap();
        std::fs::write(tree.path().join("keep.txt"), "data").unwrap();

        let mut r = resource(tree.path(), meta.path());
        let v1 = r.snapshot().unwrap();

        std::fs::remove_file(tree.path().join("keep.txt")).unwrap();
        assert!(r.dirty().unwrap());

        let e1 = ManifestEntry {
            name: "files".into(),
            hash: v1.hash,
            token: None,
        };
        r.restore(&e1).unwrap();
        assert_eq!(
            std::fs::read_to_string(tree.path().join("keep.txt")).unwrap(),
            "data"
        );
    }

    #[test]
    fn restore_of_unknown_state_is_refused() {
        let tree = tempfile::tempdir().unwrap();
        let meta = tempfile::tempdir().unwrap();
        let r = resource(tree.path(), meta.path());
        let entry = ManifestEntry {
            name: "files".into(),
            hash: "f".repeat(40),
            token: None,
        };
        assert!(matches!(
            r.precheck_restore(&entry),
            Err(ResourceError::NotRestorable { .. })
        ));
    }
}
