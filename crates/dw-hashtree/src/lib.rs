//! # dw-hashtree
//!
//! Content-addressed hashing of file trees.
//!
//! Every digest in dataworks is a 40-character lowercase hex sha1. File
//! contents are hashed with git's blob header (`blob <len>\0`) so that a
//! file's hash agrees with `git hash-object`. A directory digest is the
//! sha1 of the canonical line stream `<relpath> <file-hash>\n`, walked in
//! sorted order with an exclude set applied.
//!
//! ## Key components
//!
//! - [`hash_tree`] — one-shot digest of a directory.
//! - [`FileIndex`] — the per-file hash catalogue behind a tree digest.
//!   Persisted per resource so later invocations can verify a tree against
//!   a recorded state and report exactly which paths drifted.
//! - [`ExcludeSet`] — glob-based relative-path filter (VCS internals, the
//!   metadata directory, rotated results subtrees).

pub mod error;
pub mod hasher;
pub mod tree;

pub use error::HashTreeError;
pub use hasher::{hash_bytes, hash_file, hash_str, is_full_hash, is_hash_prefix};
pub use tree::{hash_tree, ExcludeSet, FileEntry, FileIndex, TreeDiff};
