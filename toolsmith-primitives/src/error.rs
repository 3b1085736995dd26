//! Shared error definitions for runtime primitives.

use thiserror::Error;
use uuid::Error as UuidError;

/// Result alias used throughout the runtime primitives.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while constructing primitive types.
#[derive(Debug, Error)]
pub enum Error {
    /// The provided run identifier could not be parsed.
    #[error("invalid run id: {source}")]
    InvalidRunId {
        /// Source parsing error from the UUID library.
        #[from]
        source: UuidError,
    },

    /// Capability name failed validation.
    #[error("invalid capability name `{name}`: {reason}")]
    InvalidCapabilityName {
        /// The offending name.
        name: String,
        /// Human-readable reason for rejection.
        reason: String,
    },
}
