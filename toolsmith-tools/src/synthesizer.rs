//! Turns model-authored source text into registered capabilities.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use toolsmith_primitives::CapabilityName;
use tracing::{info, warn};

use crate::artifacts::ArtifactStore;
use crate::error::{ToolError, ToolResult};
use crate::registry::{Capability, CapabilityRegistry};
use crate::runtime::{LoadError, ScriptRuntime, SourceUnit};

/// Request to create (or replace) a capability.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SynthesisRequest {
    name: String,
    source: String,
    entrypoint: String,
    description: String,
}

impl SynthesisRequest {
    /// Creates a request binding `entrypoint` of `source` under `name`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        entrypoint: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            entrypoint: entrypoint.into(),
            description: String::new(),
        }
    }

    /// Sets the free-text description reported back to the model.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Returns the requested capability name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the entrypoint symbol.
    #[must_use]
    pub fn entrypoint(&self) -> &str {
        &self.entrypoint
    }
}

/// Reported result of a synthesis attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SynthesisOutcome {
    /// The capability is registered and dispatchable.
    Registered {
        /// Capability name.
        name: String,
        /// Bound entrypoint.
        entrypoint: String,
        /// Description supplied with the request.
        description: String,
        /// Artifact holding a copy of the source.
        artifact: PathBuf,
        /// Whether an earlier capability of the same name was replaced.
        replaced: bool,
    },
    /// The request named an invalid capability.
    Rejected {
        /// Name as requested.
        name: String,
        /// Validation failure.
        reason: String,
    },
    /// The source could not be persisted or loaded; nothing was registered.
    Failed {
        /// Capability name.
        name: String,
        /// Why loading failed.
        reason: String,
    },
}

impl SynthesisOutcome {
    /// Returns `true` when a capability was registered.
    #[must_use]
    pub const fn is_registered(&self) -> bool {
        matches!(self, Self::Registered { .. })
    }
}

impl fmt::Display for SynthesisOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered {
                name,
                entrypoint,
                description,
                ..
            } => write!(
                f,
                "Tool '{name}' registered. Entrypoint: '{entrypoint}'. Description: {description}"
            ),
            Self::Rejected { name, reason } => {
                write!(f, "Tool '{name}' rejected: {reason}. Tool not created!")
            }
            Self::Failed { name, reason } => {
                write!(f, "Tool '{name}' could not be loaded: {reason}. Tool not created!")
            }
        }
    }
}

/// Persists, loads, and registers capability source.
///
/// Synthesis of one name is serialized; different names proceed concurrently.
pub struct Synthesizer {
    registry: Arc<CapabilityRegistry>,
    runtime: Arc<dyn ScriptRuntime>,
    artifacts: ArtifactStore,
    in_flight: SlotMap,
}

impl fmt::Debug for Synthesizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synthesizer")
            .field("language", &self.runtime.language())
            .field("artifacts", &self.artifacts.root())
            .finish_non_exhaustive()
    }
}

impl Synthesizer {
    /// Creates a synthesizer registering into `registry`.
    #[must_use]
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        runtime: Arc<dyn ScriptRuntime>,
        artifacts: ArtifactStore,
    ) -> Self {
        Self {
            registry,
            runtime,
            artifacts,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the runtime used to load source.
    #[must_use]
    pub fn runtime(&self) -> &Arc<dyn ScriptRuntime> {
        &self.runtime
    }

    /// Returns the artifact store.
    #[must_use]
    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Persists the source, loads it, binds the entrypoint, and registers the
    /// result under the requested name, replacing any earlier binding.
    ///
    /// Invalid names, persistence failures, malformed source, failing
    /// top-level code, and non-callable entrypoints are reported through
    /// [`SynthesisOutcome`].
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::EntrypointNotFound`] when the unit loads but does not
    /// declare the entrypoint. Nothing is registered in that case.
    pub async fn synthesize(&self, request: SynthesisRequest) -> ToolResult<SynthesisOutcome> {
        let SynthesisRequest {
            name,
            source,
            entrypoint,
            description,
        } = request;

        let name = match CapabilityName::new(name.clone()) {
            Ok(name) => name,
            Err(err) => {
                warn!(capability = %name, error = %err, "capability name rejected");
                return Ok(SynthesisOutcome::Rejected {
                    name,
                    reason: err.to_string(),
                });
            }
        };

        let lease = self.lease(&name);
        let _guard = lease.slot.lock().await;

        let artifact = match self
            .artifacts
            .write(&name, self.runtime.extension(), &source)
            .await
        {
            Ok(path) => path,
            Err(err) => {
                warn!(capability = %name, error = %err, "failed to persist capability source");
                return Ok(SynthesisOutcome::Failed {
                    name: name.into(),
                    reason: format!("could not write source artifact: {err}"),
                });
            }
        };

        let unit = SourceUnit::new(name.clone(), source, entrypoint.clone(), artifact.clone());
        let invocable = match self.runtime.load(unit).await {
            Ok(invocable) => invocable,
            Err(LoadError::MissingEntrypoint { entrypoint }) => {
                warn!(capability = %name, entrypoint = %entrypoint, "entrypoint not found");
                return Err(ToolError::EntrypointNotFound {
                    name: name.into(),
                    entrypoint,
                });
            }
            Err(err) => {
                warn!(capability = %name, error = %err, "capability failed to load");
                return Ok(SynthesisOutcome::Failed {
                    name: name.into(),
                    reason: err.to_string(),
                });
            }
        };

        let capability = Capability::new(
            name.clone(),
            entrypoint.clone(),
            description.clone(),
            invocable,
        );
        let replaced = self.registry.register(capability).is_some();
        info!(
            capability = %name,
            entrypoint = %entrypoint,
            artifact = %artifact.display(),
            replaced,
            "capability registered"
        );

        Ok(SynthesisOutcome::Registered {
            name: name.into(),
            entrypoint,
            description,
            artifact,
            replaced,
        })
    }

    fn lease(&self, name: &CapabilityName) -> SlotLease<'_> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        SlotLease {
            in_flight: &self.in_flight,
            name: name.clone(),
            slot: Arc::clone(in_flight.entry(name.clone()).or_default()),
        }
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

type SlotMap = Mutex<HashMap<CapabilityName, Arc<tokio::sync::Mutex<()>>>>;

/// Claim on the per-name lock. The map entry goes away with the last claim,
/// so the map only holds names with a synthesis in progress.
struct SlotLease<'a> {
    in_flight: &'a SlotMap,
    name: CapabilityName,
    slot: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here.
        if Arc::strong_count(&self.slot) == 2 {
            in_flight.remove(&self.name);
        }
    }
}
