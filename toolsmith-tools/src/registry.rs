//! Runtime registry for synthesized capabilities.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use thiserror::Error;
use toolsmith_primitives::CapabilityName;

/// Named arguments applied to an invocable.
pub type Arguments = Map<String, Value>;

/// Result alias for capability invocations.
pub type InvocationResult<T> = Result<T, InvocationError>;

/// Trait implemented by loaded, callable units.
///
/// Arguments are always applied by name; there is no positional convention.
#[async_trait]
pub trait Invocable: Send + Sync {
    /// Calls the unit with the supplied named arguments.
    async fn invoke(&self, arguments: Arguments) -> InvocationResult<Value>;
}

#[async_trait]
impl<F, Fut> Invocable for F
where
    F: Send + Sync + Fn(Arguments) -> Fut,
    Fut: Future<Output = InvocationResult<Value>> + Send,
{
    async fn invoke(&self, arguments: Arguments) -> InvocationResult<Value> {
        (self)(arguments).await
    }
}

/// Failure raised while a capability runs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvocationError {
    /// The capability's own logic raised.
    #[error("{exception}: {message}")]
    Raised {
        /// Exception or error type reported by the runtime.
        exception: String,
        /// Message carried by the failure.
        message: String,
    },

    /// The runtime hosting the capability failed.
    #[error("{reason}")]
    Runtime {
        /// Human-readable description of the runtime failure.
        reason: String,
    },

    /// The invocation exceeded the configured time limit.
    #[error("timed out after {after:?}")]
    TimedOut {
        /// Limit that was exceeded.
        after: Duration,
    },
}

impl InvocationError {
    /// Creates a failure raised by the capability's own code.
    #[must_use]
    pub fn raised(exception: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Raised {
            exception: exception.into(),
            message: message.into(),
        }
    }

    /// Creates a runtime failure from the supplied reason.
    #[must_use]
    pub fn runtime(reason: impl Into<String>) -> Self {
        Self::Runtime {
            reason: reason.into(),
        }
    }
}

/// A registered capability: a name bound to an invocable unit.
#[derive(Clone)]
pub struct Capability {
    name: CapabilityName,
    entrypoint: String,
    description: String,
    invocable: Arc<dyn Invocable>,
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("entrypoint", &self.entrypoint)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl Capability {
    /// Binds an invocable under the supplied name.
    #[must_use]
    pub fn new(
        name: CapabilityName,
        entrypoint: impl Into<String>,
        description: impl Into<String>,
        invocable: Arc<dyn Invocable>,
    ) -> Self {
        Self {
            name,
            entrypoint: entrypoint.into(),
            description: description.into(),
            invocable,
        }
    }

    /// Returns the capability name.
    #[must_use]
    pub fn name(&self) -> &CapabilityName {
        &self.name
    }

    /// Returns the symbol selected as the invocable inside the unit.
    #[must_use]
    pub fn entrypoint(&self) -> &str {
        &self.entrypoint
    }

    /// Returns the free-text description supplied at creation.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Invokes the bound unit.
    ///
    /// # Errors
    ///
    /// Propagates any [`InvocationError`] produced by the unit.
    pub async fn invoke(&self, arguments: Arguments) -> InvocationResult<Value> {
        self.invocable.invoke(arguments).await
    }
}

/// Registry mapping capability names to their invocable units.
///
/// One instance is owned per engine and shared by reference. Registration
/// overwrites silently, so a name always resolves to its most recent
/// synthesis. Iteration follows first-registration order.
#[derive(Default)]
pub struct CapabilityRegistry {
    inner: RwLock<IndexMap<CapabilityName, Capability>>,
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("registered", &self.names())
            .finish()
    }
}

impl CapabilityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a capability under its name, returning the one it replaced.
    pub(crate) fn register(&self, capability: Capability) -> Option<Capability> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.insert(capability.name.clone(), capability)
    }

    /// Returns the capability bound to `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Capability> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.get(name).cloned()
    }

    /// Returns the registered names.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.keys().map(ToString::to_string).collect()
    }

    /// Returns the number of registered capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when nothing has been registered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
