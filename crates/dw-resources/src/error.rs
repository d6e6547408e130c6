// error.rs — Error types for resource backends.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by resource adaptors. The engine translates these into
/// its own taxonomy at the boundary; nothing above this crate inspects
/// backend error strings.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An external tool exited non-zero.
    #[error("{tool} {args} failed{}: {stderr}", status.map(|s| format!(" (exit {})", s)).unwrap_or_default())]
    Subprocess {
        tool: String,
        args: String,
        status: Option<i32>,
        stderr: String,
    },

    /// The external tool is not installed or not on PATH.
    #[error("required tool '{tool}' not found on PATH")]
    ToolMissing { tool: String },

    /// The resource is not in a state the operation can start from.
    #[error("resource '{resource}': {message}")]
    Precondition { resource: String, message: String },

    /// The resource has local changes a destructive operation would lose.
    #[error("resource '{resource}' has uncaptured local changes: {details}")]
    Dirty { resource: String, details: String },

    /// The requested state cannot be reached from this clone.
    #[error("resource '{resource}' cannot be restored: {reason}")]
    NotRestorable { resource: String, reason: String },

    /// The resource changed between precheck and execute.
    #[error(
        "resource '{resource}' changed while the operation ran \
         (was {expected}, now {actual})"
    )]
    StateChanged {
        resource: String,
        expected: String,
        actual: String,
    },

    /// A write was attempted against a read-only resource.
    #[error("resource '{resource}' is read-only; refusing to {operation}")]
    ReadOnly { resource: String, operation: String },

    /// The catalogue entry has no usable local path on this clone.
    #[error("resource '{resource}' has no local path on this clone")]
    MissingLocalPath { resource: String },

    /// Results rotation would overwrite an existing file.
    #[error("rotation target already contains '{path}' in resource '{resource}'")]
    RotateCollision { resource: String, path: String },

    /// A blob needed for re-materialisation is missing from the side
    /// index.
    #[error("resource '{resource}' is missing snapshot blob {hash}")]
    MissingBlob { resource: String, hash: String },

    /// The snapshot manifest entry lacks the backend token this backend
    /// needs.
    #[error("snapshot entry for '{resource}' carries no usable backend token: {reason}")]
    BadToken { resource: String, reason: String },

    #[error(transparent)]
    Hash(#[from] dw_hashtree::HashTreeError),

    #[error(transparent)]
    Workspace(#[from] dw_workspace::WorkspaceError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ResourceError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::IoError { path, source }
    }
}
