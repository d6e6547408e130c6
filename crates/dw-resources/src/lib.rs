//! # dw-resources
//!
//! One uniform capability surface over five very different storage
//! backends: a managed git repository, a subdirectory of the workspace's
//! own repository, a locally managed directory, a directory mirrored by an
//! external sync utility, and an object-store bucket with server-side
//! versioning.
//!
//! The engines dispatch through [`ResourceAdaptor`]; optional capabilities
//! (remote sync, results rotation, a filesystem view over non-local
//! backends) are separate traits discovered by feature-test accessors, so
//! a backend that lacks one simply is not offered it — nothing raises
//! "not supported" at runtime.
//!
//! External tools (`git`, the sync utility, the object-store CLI) are
//! opaque subprocesses behind narrow runners; no backend error string ever
//! leaks past this crate undigested.

pub mod adaptor;
pub mod blobcat;
pub mod error;
pub(crate) mod exec;
pub mod external_sync;
pub mod factory;
pub mod git;
pub mod git_subdir;
pub mod gitcmd;
pub mod local;
pub mod object_store;
pub mod rotate;

pub use adaptor::{
    FilesystemView, ResourceAdaptor, RotatingResource, SnapshotOutcome, SyncedResource,
};
pub use error::ResourceError;
pub use factory::build_adaptor;
pub use gitcmd::GitRunner;
