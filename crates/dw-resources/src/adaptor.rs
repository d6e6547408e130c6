// adaptor.rs — The capability surface every backend implements.
//
// Core operations are on ResourceAdaptor; capabilities only some backends
// have (remote sync, results rotation, filesystem views) are separate
// traits reached through feature-test accessors. Engines ask `as_synced()`
// and act on what they get back.

use std::collections::BTreeSet;
use std::path::Path;

use dw_workspace::{ManifestEntry, Role};

use dw_hashtree::ExcludeSet;

use crate::error::ResourceError;

/// What a backend hands back from `snapshot()`: the content hash that
/// names the state, plus whatever opaque token the backend needs later to
/// restore it (a commit id, an object-version map).
#[derive(Debug, Clone)]
pub struct SnapshotOutcome {
    pub hash: String,
    pub token: Option<serde_json::Value>,
}

impl SnapshotOutcome {
    pub fn hash_only(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            token: None,
        }
    }

    pub fn with_token(hash: impl Into<String>, token: serde_json::Value) -> Self {
        Self {
            hash: hash.into(),
            token: Some(token),
        }
    }
}

/// Uniform versioning operations over one resource.
pub trait ResourceAdaptor {
    fn name(&self) -> &str;
    fn role(&self) -> Role;
    fn read_only(&self) -> bool;
    /// Backend kind tag, for reporting.
    fn kind(&self) -> &'static str;
    /// Where this resource is materialised on this clone, if anywhere.
    fn local_path(&self) -> Option<&Path>;

    /// Does the present state differ from the last captured state in a
    /// way a destructive operation could lose?
    fn dirty(&self) -> Result<bool, ResourceError>;

    /// A stable fingerprint of the present state, read without mutating
    /// anything. Read once at precheck and once at execute; a mismatch is
    /// the TOCTOU guard firing.
    fn current_state(&self) -> Result<String, ResourceError>;

    /// Verify a snapshot of this resource can succeed. Must not mutate
    /// user state.
    fn precheck_snapshot(&self) -> Result<(), ResourceError>;

    /// Capture the current state and return its identity.
    fn snapshot(&mut self) -> Result<SnapshotOutcome, ResourceError>;

    /// Verify the state in `entry` is reachable locally without data
    /// loss.
    fn precheck_restore(&self, entry: &ManifestEntry) -> Result<(), ResourceError>;

    /// Move local state to match `entry`.
    fn restore(&mut self, entry: &ManifestEntry) -> Result<(), ResourceError>;

    /// Paths that differ between two captured states of this resource.
    fn diff(
        &self,
        from: &ManifestEntry,
        to: &ManifestEntry,
    ) -> Result<BTreeSet<String>, ResourceError>;

    /// Remote synchronisation, if this backend has a remote of its own.
    fn as_synced(&mut self) -> Option<&mut dyn SyncedResource> {
        None
    }

    /// Results rotation, for backends with a local materialisation.
    fn as_rotating(&mut self) -> Option<&mut dyn RotatingResource> {
        None
    }

    /// A read view for backends with no local materialisation.
    fn as_fs_view(&self) -> Option<&dyn FilesystemView> {
        None
    }
}

/// Push/pull/clone against the resource's own remote.
pub trait SyncedResource {
    fn push(&mut self) -> Result<(), ResourceError>;
    fn pull(&mut self) -> Result<(), ResourceError>;
    /// Materialise the resource at `target` on a fresh clone.
    fn clone_to(&self, target: &Path) -> Result<(), ResourceError>;
}

/// Pre-snapshot relocation of pending result files.
pub trait RotatingResource {
    /// Move every current file (outside `exclude_files` and the rotation
    /// tree itself) under `rel_dest_root`, preserving relative paths.
    /// Returns the (from, to) relative pairs, for compensation.
    fn rotate_results(
        &mut self,
        rel_dest_root: &str,
        exclude_files: &BTreeSet<String>,
        excludes: &ExcludeSet,
    ) -> Result<Vec<(String, String)>, ResourceError>;

    /// Undo a rotation that was executed but whose snapshot failed.
    fn unrotate_results(&mut self, moved: &[(String, String)]) -> Result<(), ResourceError>;
}

/// Read access with a selectable snapshot context, for backends whose
/// truth lives server-side.
pub trait FilesystemView {
    /// List keys under `prefix` in the active snapshot context.
    fn ls(&self, prefix: &str) -> Result<Vec<String>, ResourceError>;
    /// Read one object in the active snapshot context.
    fn open(&self, key: &str) -> Result<Vec<u8>, ResourceError>;
}
