// error.rs — Error types for lineage recording.

use thiserror::Error;

use crate::refs::LineageRef;

/// Errors that can occur while recording or replaying lineage.
#[derive(Debug, Error)]
pub enum LineageError {
    /// Two reachable certificates pin different versions of the same
    /// reference.
    #[error(
        "inconsistent lineage for {reference}: {first} disagrees with {second}"
    )]
    InconsistentLineage {
        reference: LineageRef,
        first: String,
        second: String,
    },

    /// Two outputs of the same resource overlap by containment.
    #[error(
        "incompatible output paths for resource '{resource}': '{a}' and '{b}' overlap"
    )]
    SubpathConflict {
        resource: String,
        a: String,
        b: String,
    },

    /// `end_step` was called with a token no `begin_step` issued (or one
    /// already ended).
    #[error("no step in progress for this token")]
    UnknownStepToken,

    /// A certificate references a step record that is not in the store.
    #[error("lineage store is missing step record '{key}'")]
    MissingStepRecord { key: String },

    /// The resource-version hash for a source-data input could not be
    /// captured.
    #[error("cannot capture source version of {reference}: {message}")]
    SourceCapture {
        reference: LineageRef,
        message: String,
    },

    /// Reading or writing the lineage documents failed.
    #[error(transparent)]
    Store(#[from] dw_workspace::WorkspaceError),
}
