//! Observability setup for the agent.
//!
//! Installs a `tracing-subscriber` formatter writing to stderr. An explicit
//! filter directive wins over `RUST_LOG`.

#![warn(missing_docs, clippy::pedantic)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Filter applied when neither `RUST_LOG` nor an explicit directive is given.
pub const DEFAULT_FILTER: &str = "info";

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The filter directive could not be parsed.
    #[error("invalid log filter `{directive}`: {reason}")]
    InvalidFilter {
        /// Directive as supplied.
        directive: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// A global subscriber was already installed.
    #[error("tracing subscriber already installed: {reason}")]
    AlreadyInstalled {
        /// Diagnostic from `tracing-subscriber`.
        reason: String,
    },
}

/// Builds the filter: an explicit directive wins, then `RUST_LOG`, then
/// [`DEFAULT_FILTER`].
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidFilter`] when the explicit directive is
/// malformed.
pub fn filter(directive: Option<&str>) -> Result<EnvFilter, TelemetryError> {
    match directive {
        Some(directive) => {
            EnvFilter::try_new(directive).map_err(|err| TelemetryError::InvalidFilter {
                directive: directive.to_owned(),
                reason: err.to_string(),
            })
        }
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
    }
}

/// Installs the global fmt subscriber.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter is malformed or a subscriber is
/// already installed.
pub fn init(directive: Option<&str>) -> Result<(), TelemetryError> {
    let filter = filter(directive)?;
    let active = filter.to_string();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| TelemetryError::AlreadyInstalled {
            reason: err.to_string(),
        })?;
    tracing::debug!(filter = %active, "telemetry initialised");
    Ok(())
}
