// layout.rs — On-disk layout of the metadata directory.
//
// Everything the tool persists lives under `<root>/.dataworkspace/`. This
// module is the single place that knows the file names; nothing else
// hard-codes a metadata path.

use std::path::{Path, PathBuf};

use crate::error::WorkspaceError;

/// Name of the hidden metadata directory at the workspace root.
pub const METADATA_DIR: &str = ".dataworkspace";

/// Entries inside the metadata directory that must never be committed to
/// the workspace's own git repository: per-clone state only.
const VCS_IGNORES: &[&str] = &[
    "local_params.json",
    "resource_local_params.json",
    "current_lineage/",
    "file/",
    "scratch/",
    "lock.json",
];

/// Path helper for a workspace rooted at a fixed directory.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Walk up from `start` until a directory containing `.dataworkspace`
    /// is found.
    pub fn find_from(start: &Path) -> Result<Self, WorkspaceError> {
        let mut dir = Some(start);
        while let Some(d) = dir {
            if d.join(METADATA_DIR).is_dir() {
                return Ok(Self::new(d));
            }
            dir = d.parent();
        }
        Err(WorkspaceError::NotAWorkspace {
            start: start.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join(METADATA_DIR)
    }

    pub fn config_file(&self) -> PathBuf {
        self.metadata_dir().join("config.json")
    }

    pub fn resources_file(&self) -> PathBuf {
        self.metadata_dir().join("resources.json")
    }

    pub fn local_params_file(&self) -> PathBuf {
        self.metadata_dir().join("local_params.json")
    }

    pub fn resource_local_params_file(&self) -> PathBuf {
        self.metadata_dir().join("resource_local_params.json")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.metadata_dir().join("snapshots")
    }

    pub fn snapshot_manifest_file(&self, hash: &str) -> PathBuf {
        self.snapshots_dir().join(format!("snapshot-{}.json", hash))
    }

    pub fn history_file(&self) -> PathBuf {
        self.snapshots_dir().join("snapshot_history.json")
    }

    pub fn snapshot_lineage_dir(&self, hash: &str) -> PathBuf {
        self.metadata_dir().join("snapshot_lineage").join(hash)
    }

    pub fn current_lineage_dir(&self) -> PathBuf {
        self.metadata_dir().join("current_lineage")
    }

    /// Per-clone side index for the local-files backend.
    pub fn file_index_dir(&self, resource_name: &str) -> PathBuf {
        self.metadata_dir().join("file").join(resource_name)
    }

    /// Per-clone scratch space (object-store markers, manifest caches).
    pub fn scratch_dir(&self, resource_name: &str) -> PathBuf {
        self.metadata_dir().join("scratch").join(resource_name)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.metadata_dir().join("lock.json")
    }

    /// Create the metadata directory skeleton and the `.gitignore` that
    /// keeps per-clone state out of the workspace repository.
    pub fn create_skeleton(&self) -> Result<(), WorkspaceError> {
        for dir in [
            self.metadata_dir(),
            self.snapshots_dir(),
            self.metadata_dir().join("snapshot_lineage"),
            self.current_lineage_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(WorkspaceError::io(dir.clone()))?;
        }
        let gitignore = self.metadata_dir().join(".gitignore");
        let content = VCS_IGNORES.join("\n") + "\n";
        std::fs::write(&gitignore, content).map_err(WorkspaceError::io(gitignore))?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.config_file().is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_from_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.create_skeleton().unwrap();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        let found = Layout::find_from(&nested).unwrap();
        assert_eq!(found.root(), dir.path());
    }

    #[test]
    fn find_from_fails_outside_workspace() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Layout::find_from(dir.path()),
            Err(WorkspaceError::NotAWorkspace { .. })
        ));
    }
}
