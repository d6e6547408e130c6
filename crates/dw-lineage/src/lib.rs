//! # dw-lineage
//!
//! Records how artefacts were produced: which step, from which inputs, at
//! which resource versions.
//!
//! The lineage graph is a DAG whose vertices are [`LineageRef`]s (a
//! resource name plus optional subpath) and whose hyperedges are step
//! records (inputs → outputs). Each ref carries a [`Certificate`]: either
//! the producing step's identity or, for source data, the resource-version
//! hash captured when the data was first read.
//!
//! Recording a step validates the transitive input closure: if two
//! reachable certificates pin different versions of the same reference,
//! recording fails with an inconsistent-lineage error naming both
//! producers — at record time, never later.
//!
//! The working set lives under `current_lineage/`; at snapshot time it is
//! frozen into `snapshot_lineage/<hash>/` with step certificates resolved
//! to resource-version hashes, and at restore/pull it is replaced or
//! cleared.

pub mod error;
pub mod records;
pub mod refs;
pub mod store;

pub use error::LineageError;
pub use records::{InputCert, SourceDataRecord, StepRecord};
pub use refs::{Certificate, LineageRef};
pub use store::{LineageStore, StepToken};
