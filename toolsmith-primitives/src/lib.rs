//! Core shared types for the self-extending agent runtime.

#![warn(missing_docs, clippy::pedantic)]

mod capability;
mod error;
mod ids;

/// Validated names under which runtime capabilities are registered.
pub use capability::{CapabilityName, MAX_NAME_LEN};
/// Error type and result alias shared across the workspace.
pub use error::{Error, Result};
/// Identifier attached to a single agent run.
pub use ids::RunId;
