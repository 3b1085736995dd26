use thiserror::Error;

/// Result alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is unset or blank.
    #[error("missing required setting `{variable}`")]
    Missing {
        /// Variable name.
        variable: &'static str,
    },

    /// A variable is set but cannot be parsed.
    #[error("invalid value for `{variable}`: {reason}")]
    Invalid {
        /// Variable name.
        variable: &'static str,
        /// Parse failure.
        reason: String,
    },

    /// The `.env` file exists but could not be read.
    #[error("failed to load .env file: {source}")]
    DotEnv {
        /// Source [`dotenvy::Error`].
        #[from]
        source: dotenvy::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(variable: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            variable,
            reason: reason.into(),
        }
    }
}
