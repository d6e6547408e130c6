// error.rs — Error types for tree hashing.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while hashing or verifying a file tree.
#[derive(Debug, Error)]
pub enum HashTreeError {
    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The directory walk failed partway through.
    #[error("walk failed under {root}: {source}")]
    WalkFailed {
        root: PathBuf,
        source: walkdir::Error,
    },

    /// An exclude pattern did not compile.
    #[error("invalid exclude pattern '{pattern}': {source}")]
    BadPattern {
        pattern: String,
        source: globset::Error,
    },

    /// A path under the walk root was not valid UTF-8.
    #[error("non-UTF-8 path under {root}: {path:?}")]
    NonUtf8Path { root: PathBuf, path: PathBuf },
}
