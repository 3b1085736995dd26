//! Seam between the engine and the interpreter that executes capability source.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use toolsmith_primitives::CapabilityName;

use crate::registry::Invocable;

/// Source text handed to a [`ScriptRuntime`] for loading.
#[derive(Clone, Debug)]
pub struct SourceUnit {
    name: CapabilityName,
    source: Arc<str>,
    entrypoint: String,
    artifact: PathBuf,
}

impl SourceUnit {
    /// Describes a unit whose source was persisted at `artifact`.
    #[must_use]
    pub fn new(
        name: CapabilityName,
        source: impl Into<Arc<str>>,
        entrypoint: impl Into<String>,
        artifact: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name,
            source: source.into(),
            entrypoint: entrypoint.into(),
            artifact: artifact.into(),
        }
    }

    /// Returns the capability name the unit is loaded under.
    #[must_use]
    pub fn name(&self) -> &CapabilityName {
        &self.name
    }

    /// Returns the full source text.
    #[must_use]
    pub fn source(&self) -> &Arc<str> {
        &self.source
    }

    /// Returns the symbol to resolve after execution.
    #[must_use]
    pub fn entrypoint(&self) -> &str {
        &self.entrypoint
    }

    /// Returns the on-disk artifact the source was written to.
    ///
    /// Runtimes use it for diagnostics only; the in-memory source is
    /// authoritative.
    #[must_use]
    pub fn artifact(&self) -> &Path {
        &self.artifact
    }
}

/// Reasons a unit could not be turned into an invocable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The source could not be compiled.
    #[error("malformed source: {reason}")]
    Malformed {
        /// Compiler diagnostic.
        reason: String,
    },

    /// Executing the unit's top-level definitions raised.
    #[error("loading raised {reason}")]
    Execution {
        /// Error raised by the unit.
        reason: String,
    },

    /// The unit executed but does not declare the entrypoint.
    #[error("entrypoint `{entrypoint}` not found")]
    MissingEntrypoint {
        /// Symbol that could not be resolved.
        entrypoint: String,
    },

    /// The entrypoint exists but cannot be called.
    #[error("entrypoint `{entrypoint}` is a `{kind}`, not a callable")]
    NotCallable {
        /// Symbol that was resolved.
        entrypoint: String,
        /// Runtime type of the resolved symbol.
        kind: String,
    },

    /// The runtime itself is not usable.
    #[error("runtime unavailable: {reason}")]
    Unavailable {
        /// Description of the runtime failure.
        reason: String,
    },
}

/// Interpreter able to compile capability source and bind its entrypoint.
#[async_trait]
pub trait ScriptRuntime: Send + Sync {
    /// Language identifier, used in logs and prompts.
    fn language(&self) -> &'static str;

    /// File extension of persisted artifacts, without the leading dot.
    fn extension(&self) -> &'static str;

    /// File that marks the artifact directory as a package, if the language uses one.
    fn package_marker(&self) -> Option<&'static str> {
        None
    }

    /// Loads the unit in a namespace keyed by its capability name, executes its
    /// top-level definitions, and binds the entrypoint.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] describing why no invocable could be produced.
    async fn load(&self, unit: SourceUnit) -> Result<Arc<dyn Invocable>, LoadError>;
}
