//! Error types for the capability engine.
//!
//! Most engine failures are reported to the model as observation text and
//! never reach this type. [`ToolError`] covers the remaining faults: the
//! unresolved-entrypoint case of synthesis, malformed operation requests, and
//! startup I/O.

use thiserror::Error;

/// Result alias for engine operations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Errors produced by the capability engine.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The synthesized unit loaded, but does not declare the requested entrypoint.
    #[error("tool `{name}` has no attribute `{entrypoint}`")]
    EntrypointNotFound {
        /// Capability being synthesized.
        name: String,
        /// Symbol that could not be resolved.
        entrypoint: String,
    },

    /// The model asked for an operation the engine does not offer.
    #[error("unknown operation `{name}`")]
    UnknownOperation {
        /// Requested operation name.
        name: String,
    },

    /// Operation arguments could not be decoded.
    #[error("invalid arguments for `{operation}`: {reason}")]
    InvalidArguments {
        /// Operation whose arguments were rejected.
        operation: &'static str,
        /// Human-readable decoding failure.
        reason: String,
    },

    /// Filesystem failure while preparing the artifact directory.
    #[error("i/o error: {source}")]
    Io {
        /// Source [`std::io::Error`].
        #[from]
        source: std::io::Error,
    },
}

impl ToolError {
    /// Creates an argument decoding error for the supplied operation.
    #[must_use]
    pub fn invalid_arguments(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            operation,
            reason: reason.into(),
        }
    }

    /// Returns `true` for faults that must abort the agent run instead of being
    /// fed back to the model.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::EntrypointNotFound { .. } | Self::Io { .. })
    }
}
