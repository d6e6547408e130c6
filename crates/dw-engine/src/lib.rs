//! # dw-engine
//!
//! The coordinating engines: snapshot, restore, and sync over every
//! resource in the catalogue, plus results rotation, lineage freezing,
//! metrics extraction, and reporting.
//!
//! Every multi-resource operation is staged as a [`plan::Plan`]: an
//! ordered list of described actions with pre-run validators and
//! per-action compensators. Validators all run before the first action
//! executes, so a refused operation has no side effects; a mid-plan
//! failure runs the compensators of what already executed.
//!
//! Backend errors are translated into the engine taxonomy
//! ([`EngineError`]) at this boundary; each variant knows its process
//! exit code.

pub mod diff;
pub mod error;
pub mod metrics;
pub mod plan;
pub mod restore;
pub mod snapshot;
pub mod status;
pub mod sync;
pub mod template;
pub mod workspace;

pub use error::EngineError;
pub use workspace::Workspace;
