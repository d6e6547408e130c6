// blobcat.rs — Side index of snapshot blobs for directory backends.
//
// Backends without a native history (local files, external-sync with a
// local master) keep a per-clone catalogue under the metadata directory:
// one FileIndex document per captured root hash, plus a content-addressed
// blob store holding every file version seen at snapshot time. Restore
// re-materialises files from the blobs.
//
// Layout under `.dataworkspace/file/<resource>/`:
//   index-<roothash>.json   per-snapshot file index
//   current.json            index at the last capture (dirty checks)
//   blobs/<filehash>        file contents, keyed by content hash

use std::path::{Path, PathBuf};

use tracing::debug;

use dw_hashtree::{hash_file, ExcludeSet, FileIndex, TreeDiff};
use dw_workspace::store as ws_store;

use crate::error::ResourceError;

#[derive(Debug, Clone)]
pub struct BlobCatalogue {
    resource: String,
    dir: PathBuf,
}

impl BlobCatalogue {
    pub fn new(resource: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            resource: resource.into(),
            dir: dir.into(),
        }
    }

    fn index_file(&self, root_hash: &str) -> PathBuf {
        self.dir.join(format!("index-{}.json", root_hash))
    }

    fn current_file(&self) -> PathBuf {
        self.dir.join("current.json")
    }

    fn blob_file(&self, file_hash: &str) -> PathBuf {
        self.dir.join("blobs").join(file_hash)
    }

    /// Record a capture: persist the index under its root hash, stash any
    /// blobs not yet in the store, and update the current-state index.
    pub fn record_snapshot(
        &self,
        index: &FileIndex,
        tree_root: &Path,
    ) -> Result<String, ResourceError> {
        let root_hash = index.root_hash();
        for (rel, entry) in &index.entries {
            let blob = self.blob_file(&entry.hash);
            if blob.exists() {
                continue;
            }
            let parent = blob.parent().expect("blob path has a parent");
            std::fs::create_dir_all(parent).map_err(ResourceError::io(parent))?;
            let src = tree_root.join(rel);
            std::fs::copy(&src, &blob).map_err(ResourceError::io(&src))?;
        }
        ws_store::write_json_atomic(&self.index_file(&root_hash), index)?;
        ws_store::write_json_atomic(&self.current_file(), index)?;
        debug!(resource = %self.resource, %root_hash, files = index.len(), "recorded blob index");
        Ok(root_hash)
    }

    pub fn load_index(&self, root_hash: &str) -> Result<Option<FileIndex>, ResourceError> {
        let path = self.index_file(root_hash);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(ws_store::read_json(&path)?))
    }

    pub fn load_current(&self) -> Result<Option<FileIndex>, ResourceError> {
        let path = self.current_file();
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(ws_store::read_json(&path)?))
    }

    pub fn save_current(&self, index: &FileIndex) -> Result<(), ResourceError> {
        ws_store::write_json_atomic(&self.current_file(), index)?;
        Ok(())
    }

    /// Check that every blob needed to reach `index` from the live tree
    /// is either already on disk in place or present in the blob store.
    pub fn verify_restorable(
        &self,
        index: &FileIndex,
        tree_root: &Path,
    ) -> Result<(), ResourceError> {
        for (rel, entry) in &index.entries {
            let live = tree_root.join(rel);
            if live.is_file() && hash_file(&live)? == entry.hash {
                continue;
            }
            if !self.blob_file(&entry.hash).exists() {
                return Err(ResourceError::MissingBlob {
                    resource: self.resource.clone(),
                    hash: entry.hash.clone(),
                });
            }
        }
        Ok(())
    }

    /// Make the live tree match `index`: copy differing files out of the
    /// blob store and delete files the index does not know.
    pub fn materialize(
        &self,
        index: &FileIndex,
        tree_root: &Path,
        excludes: &ExcludeSet,
    ) -> Result<TreeDiff, ResourceError> {
        let live = FileIndex::capture(tree_root, excludes)?;
        let diff = index.diff(&live);

        // `added` relative to the target index means: present live, not in
        // the snapshot — delete. `removed`/`modified` come from blobs.
        for rel in &diff.added {
            let path = tree_root.join(rel);
            make_writable(&path)?;
            std::fs::remove_file(&path).map_err(ResourceError::io(&path))?;
        }
        for rel in diff.removed.iter().chain(diff.modified.iter()) {
            let entry = &index.entries[rel];
            let blob = self.blob_file(&entry.hash);
            if !blob.exists() {
                return Err(ResourceError::MissingBlob {
                    resource: self.resource.clone(),
                    hash: entry.hash.clone(),
                });
            }
            let dest = tree_root.join(rel);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(ResourceError::io(parent))?;
            }
            if dest.exists() {
                make_writable(&dest)?;
            }
            std::fs::copy(&blob, &dest).map_err(ResourceError::io(&dest))?;
        }
        self.save_current(index)?;
        Ok(diff)
    }
}

fn make_writable(path: &Path) -> Result<(), ResourceError> {
    if let Ok(metadata) = std::fs::metadata(path) {
        let mut perms = metadata.permissions();
        if perms.readonly() {
            #[allow(clippy::permissions_set_readonly_false)]
            perms.set_readonly(false);
            std::fs::set_permissions(path, perms).map_err(ResourceError::io(path))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn snapshot_then_materialize_round_trips() {
        let tree = tempfile::tempdir().unwrap();
        let meta = tempfile::tempdir().unwrap();
        let cat = BlobCatalogue::new("files", meta.path());
        let ex = ExcludeSet::empty();

        write(tree.path(), "a.txt", "alpha");
        write(tree.path(), "sub/b.txt", "beta");
        let index = FileIndex::capture(tree.path(), &ex).unwrap();
        let root_hash = cat.record_snapshot(&index, tree.path()).unwrap();

        // Drift: edit, delete, add.
        write(tree.path(), "a.txt", "changed");
        std::fs::remove_file(tree.path().join("sub/b.txt")).unwrap();
        write(tree.path(), "new.txt", "extra");

        cat.verify_restorable(&index, tree.path()).unwrap();
        cat.materialize(&index, tree.path(), &ex).unwrap();

        let after = FileIndex::capture(tree.path(), &ex).unwrap();
        assert_eq!(after.root_hash(), root_hash);
        assert_eq!(
            std::fs::read_to_string(tree.path().join("a.txt")).unwrap(),
            "alpha"
        );
        assert!(!tree.path().join("new.txt").exists());
    }

    #[test]
    fn missing_blob_is_detected() {
        let tree = tempfile::tempdir().unwrap();
        let meta = tempfile::tempdir().unwrap();
        let cat = BlobCatalogue::new("files", meta.path());
        let ex = ExcludeSet::empty();

        write(tree.path(), "a.txt", "alpha");
        let index = FileIndex::capture(tree.path(), &ex).unwrap();
        cat.record_snapshot(&index, tree.path()).unwrap();

        // Lose the blob, then drift the live file.
        let entry = index.entries.get("a.txt").unwrap();
        std::fs::remove_file(meta.path().join("blobs").join(&entry.hash)).unwrap();
        write(tree.path(), "a.txt", "changed");

        assert!(matches!(
            cat.verify_restorable(&index, tree.path()),
            Err(ResourceError::MissingBlob { .. })
        ));
    }
}
