// error.rs — Error types for the metadata store.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading or mutating workspace metadata.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to serialize or deserialize a metadata document.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No `.dataworkspace` directory found here or in any parent.
    #[error("no workspace found at or above {start}")]
    NotAWorkspace { start: PathBuf },

    /// The on-disk metadata was written by an incompatible version.
    #[error("workspace format version {found} is not supported (expected {expected})")]
    SchemaVersion { found: u32, expected: u32 },

    /// A resource with this name is already in the catalogue.
    #[error("resource '{name}' already exists in the workspace")]
    DuplicateResource { name: String },

    /// The name is not usable as a resource name.
    #[error("invalid resource name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Two resources would share or nest their on-disk paths.
    #[error(
        "resource '{a_name}' at {a_path} overlaps resource '{b_name}' at {b_path}"
    )]
    PathOverlap {
        a_name: String,
        a_path: PathBuf,
        b_name: String,
        b_path: PathBuf,
    },

    /// A catalogue entry has no local-parameter record on this clone.
    #[error("resource '{name}' has no local parameters on this clone (run clone or add)")]
    MissingLocalParams { name: String },

    /// The named resource is not in the catalogue.
    #[error("no resource named '{name}' in the workspace")]
    UnknownResource { name: String },

    /// The tag already points at a snapshot on this host.
    #[error("tag '{tag}' already points at snapshot {hash} on host {hostname}")]
    TagInUse {
        tag: String,
        hostname: String,
        hash: String,
    },

    /// The reference matched no snapshot.
    #[error("no snapshot matches '{reference}'")]
    UnknownSnapshot { reference: String },

    /// The hash prefix matched more than one snapshot.
    #[error("'{reference}' is ambiguous: {count} snapshots match")]
    AmbiguousReference { reference: String, count: usize },

    /// Another invocation holds the workspace lock.
    #[error(
        "workspace is locked by pid {pid} on {hostname} ({path}); \
         if that process is gone, remove the lock file"
    )]
    Locked {
        pid: u32,
        hostname: String,
        path: PathBuf,
    },
}

impl WorkspaceError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::IoError { path, source }
    }
}
