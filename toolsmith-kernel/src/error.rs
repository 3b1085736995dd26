//! Error types for the agent loop.

use thiserror::Error;
use toolsmith_adapters::traits::AdapterError;
use toolsmith_tools::ToolError;

/// Result alias for loop operations.
pub type KernelResult<T> = Result<T, KernelError>;

/// Faults that abort an agent run.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The model adapter failed.
    #[error("adapter `{provider}` for model `{model}` error: {source}")]
    Adapter {
        /// Provider identifier.
        provider: &'static str,
        /// Model identifier.
        model: String,
        /// Underlying adapter failure.
        #[source]
        source: AdapterError,
    },

    /// An operation failed in a way that must not be fed back to the model.
    #[error("operation `{operation}` failed: {source}")]
    Tool {
        /// Operation requested by the model.
        operation: String,
        /// Underlying engine failure.
        #[source]
        source: ToolError,
    },

    /// The model kept requesting operations past the configured limit.
    #[error("no final answer after {limit} model turns")]
    StepLimitExceeded {
        /// Configured limit.
        limit: usize,
    },
}
