// external_sync.rs — Directory mirrored by an external sync utility.
//
// The tool (rclone by default) is an opaque subprocess: copy and sync
// transfers, nothing else. The content hash is the local tree digest
// taken after synchronising in the configured direction. When the remote
// is the master, restore re-syncs from it; when the local directory is
// the master, restore re-materialises from the snapshot blob catalogue,
// exactly like the local-files backend.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::info;

use dw_hashtree::{ExcludeSet, FileIndex};
use dw_workspace::{ManifestEntry, Role, SyncDirection, SyncMode};

use crate::adaptor::{
    ResourceAdaptor, RotatingResource, SnapshotOutcome, SyncedResource,
};
use crate::blobcat::BlobCatalogue;
use crate::error::ResourceError;
use crate::exec::run_tool;
use crate::rotate;

/// Default executable name of the sync utility.
pub const DEFAULT_SYNC_TOOL: &str = "rclone";

/// Narrow runner for the sync utility.
#[derive(Debug, Clone)]
pub struct SyncRunner {
    tool: String,
    config_path: Option<String>,
}

impl SyncRunner {
    pub fn new(tool: impl Into<String>, config_path: Option<String>) -> Self {
        Self {
            tool: tool.into(),
            config_path,
        }
    }

    fn run(&self, args: &[&str]) -> Result<String, ResourceError> {
        let mut full: Vec<&str> = Vec::new();
        if let Some(config) = &self.config_path {
            full.push("--config");
            full.push(config);
        }
        full.extend_from_slice(args);
        run_tool(&self.tool, &full, None)
    }

    pub fn available(&self) -> Result<(), ResourceError> {
        self.run(&["version"]).map(|_| ())
    }

    pub fn transfer(
        &self,
        mode: SyncMode,
        from: &str,
        to: &str,
        checksum: bool,
    ) -> Result<(), ResourceError> {
        let verb = match mode {
            SyncMode::Copy => "copy",
            SyncMode::Sync => "sync",
        };
        let mut args = vec![verb, from, to];
        if checksum {
            args.push("--checksum");
        }
        self.run(&args).map(|_| ())
    }
}

pub struct ExternalSyncResource {
    name: String,
    role: Role,
    read_only: bool,
    local_path: PathBuf,
    remote: String,
    direction: SyncDirection,
    mode: SyncMode,
    compute_hash: bool,
    runner: SyncRunner,
    catalogue: BlobCatalogue,
    excludes: ExcludeSet,
}

impl ExternalSyncResource {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        role: Role,
        read_only: bool,
        local_path: impl Into<PathBuf>,
        remote: impl Into<String>,
        direction: SyncDirection,
        mode: SyncMode,
        compute_hash: bool,
        config_path: Option<String>,
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
            remote: remote.into(),
            direction,
            mode,
            compute_hash,
            runner: SyncRunner::new(DEFAULT_SYNC_TOOL, config_path),
            excludes,
        }
    }

    fn local_str(&self) -> String {
        self.local_path.to_string_lossy().to_string()
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

impl ResourceAdaptor for ExternalSyncResource {
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
        "sync"
    }

    fn local_path(&self) -> Option<&Path> {
        Some(&self.local_path)
    }

    fn dirty(&self) -> Result<bool, ResourceError> {
        match self.catalogue.load_current()? {
            Some(current) => Ok(!current.verify(&self.local_path, &self.excludes)?.is_empty()),
            None => Ok(false),
        }
    }

    fn current_state(&self) -> Result<String, ResourceError> {
        Ok(self.capture()?.root_hash())
    }

    fn precheck_snapshot(&self) -> Result<(), ResourceError> {
        self.runner.available()?;
        if !self.local_path.is_dir() {
            return Err(ResourceError::Precondition {
                resource: self.name.clone(),
                message: format!("{} does not exist", self.local_path.display()),
            });
        }
        Ok(())
    }

    fn snapshot(&mut self) -> Result<SnapshotOutcome, ResourceError> {
        match self.direction {
            SyncDirection::RemoteIsMaster => {
                info!(resource = %self.name, remote = %self.remote, "refreshing from remote");
                self.runner
                    .transfer(SyncMode::Copy, &self.remote, &self.local_str(), self.compute_hash)?;
            }
            SyncDirection::LocalIsMaster => {
                if !self.read_only {
                    info!(resource = %self.name, remote = %self.remote, "publishing to remote");
                    self.runner
                        .transfer(self.mode, &self.local_str(), &self.remote, self.compute_hash)?;
                }
            }
        }
        let index = self.capture()?;
        let root_hash = self.catalogue.record_snapshot(&index, &self.local_path)?;
        Ok(SnapshotOutcome::hash_only(root_hash))
    }

    fn precheck_restore(&self, entry: &ManifestEntry) -> Result<(), ResourceError> {
        if self.read_only {
            if self.current_state()? != entry.hash {
                return Err(ResourceError::ReadOnly {
                    resource: self.name.clone(),
                    operation: "re-materialise files".to_string(),
                });
            }
            return Ok(());
        }
        match self.direction {
            SyncDirection::RemoteIsMaster => self.runner.available(),
            SyncDirection::LocalIsMaster => {
                let index = self.index_for(entry)?;
                self.catalogue.verify_restorable(&index, &self.local_path)
            }
        }
    }

    fn restore(&mut self, entry: &ManifestEntry) -> Result<(), ResourceError> {
        if self.read_only {
            return Ok(());
        }
        match self.direction {
            SyncDirection::RemoteIsMaster => {
                self.runner
                    .transfer(SyncMode::Sync, &self.remote, &self.local_str(), self.compute_hash)?;
                let now = self.current_state()?;
                if now != entry.hash {
                    return Err(ResourceError::NotRestorable {
                        resource: self.name.clone(),
                        reason: format!(
                            "remote no longer holds state {} (re-sync produced {})",
                            entry.hash, now
                        ),
                    });
                }
                Ok(())
            }
            SyncDirection::LocalIsMaster => {
                let index = self.index_for(entry)?;
                self.catalogue
                    .materialize(&index, &self.local_path, &self.excludes)?;
                Ok(())
            }
        }
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

    fn as_synced(&mut self) -> Option<&mut dyn SyncedResource> {
        Some(self)
    }

    fn as_rotating(&mut self) -> Option<&mut dyn RotatingResource> {
        Some(self)
    }
}

impl SyncedResource for ExternalSyncResource {
    fn push(&mut self) -> Result<(), ResourceError> {
        match self.direction {
            SyncDirection::LocalIsMaster if !self.read_only => {
                self.runner
                    .transfer(self.mode, &self.local_str(), &self.remote, self.compute_hash)
            }
            // The remote already holds the truth.
            _ => Ok(()),
        }
    }

    fn pull(&mut self) -> Result<(), ResourceError> {
        match self.direction {
            SyncDirection::RemoteIsMaster => {
                self.runner
                    .transfer(SyncMode::Copy, &self.remote, &self.local_str(), self.compute_hash)
            }
            SyncDirection::LocalIsMaster => Ok(()),
        }
    }

    fn clone_to(&self, target: &Path) -> Result<(), ResourceError> {
        std::fs::create_dir_all(target).map_err(ResourceError::io(target))?;
        self.runner.transfer(
            SyncMode::Copy,
            &self.remote,
            &target.to_string_lossy(),
            self.compute_hash,
        )
    }
}

impl RotatingResource for ExternalSyncResource {
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
