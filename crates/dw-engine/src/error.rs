// error.rs — The engine-boundary error taxonomy.
//
// Backend and store errors are translated here, once, into five classes
// with fixed process exit codes:
//
//   1  user-input errors and precondition failures (no side effects)
//   2  backend / subprocess / system failures
//   3  data inconsistency (lineage, schema drift, TOCTOU hash mismatch)
//   4  broken internal invariants
//
// The engine never inspects backend error strings; classification is by
// variant.

use thiserror::Error;

use dw_lineage::LineageError;
use dw_resources::ResourceError;
use dw_workspace::WorkspaceError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad arguments or an impossible request. No side effects.
    #[error("{message}")]
    UserInput { message: String },

    /// The operation cannot start from the current state. No side
    /// effects; `remediation` tells the user what would unblock it.
    #[error("{message}{}", remediation.as_ref().map(|r| format!("\n  hint: {}", r)).unwrap_or_default())]
    Precondition {
        message: String,
        remediation: Option<String>,
    },

    /// A data-integrity violation was detected.
    #[error("inconsistency: {message}")]
    Inconsistency { message: String },

    /// A backend operation failed, wrapped with resource and phase.
    #[error("resource '{resource}' failed during {phase}: {source}")]
    Backend {
        resource: String,
        phase: String,
        source: ResourceError,
    },

    /// The metadata layer failed (I/O, serialization, subprocess).
    #[error("system error: {message}")]
    System { message: String },

    /// A broken invariant inside the tool itself.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    pub fn user(message: impl Into<String>) -> Self {
        Self::UserInput {
            message: message.into(),
        }
    }

    pub fn precondition(message: impl Into<String>, remediation: Option<String>) -> Self {
        Self::Precondition {
            message: message.into(),
            remediation,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wrap a backend error with its resource and phase, classifying
    /// precondition-like failures as preconditions rather than system
    /// errors.
    pub fn backend(resource: &str, phase: &str, source: ResourceError) -> Self {
        match source {
            ResourceError::Dirty { .. }
            | ResourceError::Precondition { .. }
            | ResourceError::ReadOnly { .. }
            | ResourceError::NotRestorable { .. }
            | ResourceError::MissingBlob { .. }
            | ResourceError::MissingLocalPath { .. }
            | ResourceError::ToolMissing { .. } => Self::Precondition {
                message: format!("{} ({} phase)", source, phase),
                remediation: None,
            },
            ResourceError::StateChanged { .. } => Self::Inconsistency {
                message: source.to_string(),
            },
            other => Self::Backend {
                resource: resource.to_string(),
                phase: phase.to_string(),
                source: other,
            },
        }
    }

    /// The process exit code for this error class.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::UserInput { .. } | Self::Precondition { .. } => 1,
            Self::Backend { .. } | Self::System { .. } => 2,
            Self::Inconsistency { .. } => 3,
            Self::Internal { .. } => 4,
        }
    }
}

impl From<WorkspaceError> for EngineError {
    fn from(err: WorkspaceError) -> Self {
        match err {
            WorkspaceError::NotAWorkspace { .. }
            | WorkspaceError::DuplicateResource { .. }
            | WorkspaceError::InvalidName { .. }
            | WorkspaceError::PathOverlap { .. }
            | WorkspaceError::UnknownResource { .. }
            | WorkspaceError::TagInUse { .. }
            | WorkspaceError::UnknownSnapshot { .. }
            | WorkspaceError::AmbiguousReference { .. }
            | WorkspaceError::MissingLocalParams { .. } => Self::UserInput {
                message: err.to_string(),
            },
            WorkspaceError::Locked { .. } => Self::Precondition {
                message: err.to_string(),
                remediation: None,
            },
            WorkspaceError::SchemaVersion { .. } => Self::Inconsistency {
                message: err.to_string(),
            },
            WorkspaceError::IoError { .. } | WorkspaceError::Serialization(_) => Self::System {
                message: err.to_string(),
            },
        }
    }
}

impl From<LineageError> for EngineError {
    fn from(err: LineageError) -> Self {
        match err {
            LineageError::InconsistentLineage { .. } => Self::Inconsistency {
                message: err.to_string(),
            },
            LineageError::SubpathConflict { .. } | LineageError::SourceCapture { .. } => {
                Self::UserInput {
                    message: err.to_string(),
                }
            }
            LineageError::Store(inner) => Self::from(inner),
            LineageError::UnknownStepToken | LineageError::MissingStepRecord { .. } => {
                Self::Internal {
                    message: err.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_the_taxonomy() {
        assert_eq!(EngineError::user("x").exit_code(), 1);
        assert_eq!(EngineError::precondition("x", None).exit_code(), 1);
        assert_eq!(
            EngineError::Inconsistency {
                message: "x".into()
            }
            .exit_code(),
            3
        );
        assert_eq!(
            EngineError::System {
                message: "x".into()
            }
            .exit_code(),
            2
        );
        assert_eq!(EngineError::internal("x").exit_code(), 4);
    }

    #[test]
    fn backend_wrapping_classifies_dirtiness_as_precondition() {
        let dirty = ResourceError::Dirty {
            resource: "r".into(),
            details: "edits".into(),
        };
        assert_eq!(EngineError::backend("r", "precheck", dirty).exit_code(), 1);

        let toctou = ResourceError::StateChanged {
            resource: "r".into(),
            expected: "a".into(),
            actual: "b".into(),
        };
        assert_eq!(EngineError::backend("r", "capture", toctou).exit_code(), 3);

        let boom = ResourceError::Subprocess {
            tool: "git".into(),
            args: "push".into(),
            status: Some(128),
            stderr: "remote hung up".into(),
        };
        assert_eq!(EngineError::backend("r", "push", boom).exit_code(), 2);
    }
}
