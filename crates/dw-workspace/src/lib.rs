//! # dw-workspace
//!
//! The persistent metadata store behind a workspace.
//!
//! Everything lives as JSON documents under the hidden `.dataworkspace/`
//! directory: the resource catalogue (shared across clones), per-clone
//! local parameters, snapshot manifests and history, and the lineage
//! directories. Shared state is versioned by the workspace's own git
//! repository; local state is excluded via a maintained `.gitignore`.
//!
//! ## Key components
//!
//! - [`Layout`] — every metadata path, derived from the workspace root.
//! - [`store`] — the single accessor all reads and writes funnel through:
//!   schema-version checking on load, write-to-temp-then-rename on save.
//! - [`Catalogue`] — the ordered resource list, mutated only through
//!   transactional batches.
//! - [`SnapshotHistory`] / [`SnapshotManifest`] — snapshot identity and the
//!   append-only history with tag and hash-prefix resolution.
//! - [`WorkspaceLock`] — advisory per-workspace lockfile (PID + host).

pub mod catalogue;
pub mod config;
pub mod error;
pub mod history;
pub mod layout;
pub mod lock;
pub mod store;

pub use catalogue::{
    BackendConfig, Catalogue, CatalogueTransaction, LocalParamsMap, ResourceConfig,
    ResourceLocalParams, Role, SyncDirection, SyncMode,
};
pub use config::{LocalConfig, WorkspaceConfig, FORMAT_VERSION};
pub use error::WorkspaceError;
pub use history::{HistoryEntry, ManifestEntry, SnapshotHistory, SnapshotManifest};
pub use layout::Layout;
pub use lock::WorkspaceLock;
