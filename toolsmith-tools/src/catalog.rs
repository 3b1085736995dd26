//! Read-only view over the registered capability names.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::registry::CapabilityRegistry;

/// Entry describing one registered capability.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    /// Capability name.
    pub name: String,
    /// Bound entrypoint.
    pub entrypoint: String,
    /// Description supplied at creation.
    pub description: String,
}

/// Snapshot of the registry at one point in time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Listing(Vec<String>);

impl Listing {
    /// Returns the names in registration order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.0
    }

    /// Consumes the listing.
    #[must_use]
    pub fn into_names(self) -> Vec<String> {
        self.0
    }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// Reports what the registry currently holds.
#[derive(Debug, Clone)]
pub struct Catalog {
    registry: Arc<CapabilityRegistry>,
}

impl Catalog {
    /// Creates a catalog over `registry`.
    #[must_use]
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }

    /// Lists registered names. Never mutates the registry.
    #[must_use]
    pub fn list(&self) -> Listing {
        Listing(self.registry.names())
    }

    /// Lists registered capabilities with their entrypoints and descriptions.
    #[must_use]
    pub fn describe(&self) -> Vec<CatalogEntry> {
        self.registry
            .names()
            .into_iter()
            .filter_map(|name| self.registry.lookup(&name))
            .map(|capability| CatalogEntry {
                name: capability.name().to_string(),
                entrypoint: capability.entrypoint().to_owned(),
                description: capability.description().to_owned(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::{Value, json};
    use toolsmith_primitives::CapabilityName;

    use crate::registry::{Arguments, Capability, InvocationError};

    fn register(registry: &CapabilityRegistry, name: &str) {
        registry.register(Capability::new(
            CapabilityName::new(name).unwrap(),
            "run",
            format!("{name} tool"),
            Arc::new(|_args: Arguments| async move { Ok::<_, InvocationError>(Value::Null) }),
        ));
    }

    #[test]
    fn empty_registry_lists_nothing() {
        let catalog = Catalog::new(Arc::new(CapabilityRegistry::new()));
        assert!(catalog.list().names().is_empty());
        assert_eq!(catalog.list().to_string(), "[]");
    }

    #[test]
    fn listing_is_idempotent() {
        let registry = Arc::new(CapabilityRegistry::new());
        register(&registry, "echo");
        register(&registry, "add");
        let catalog = Catalog::new(registry.clone());

        let first = catalog.list();
        let second = catalog.list();

        assert_eq!(first, second);
        assert_eq!(first.names(), ["echo", "add"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn listing_serializes_as_array() {
        let registry = Arc::new(CapabilityRegistry::new());
        register(&registry, "echo");
        let listing = Catalog::new(registry).list();
        assert_eq!(serde_json::to_value(&listing).unwrap(), json!(["echo"]));
    }

    #[test]
    fn describe_reports_entrypoints() {
        let registry = Arc::new(CapabilityRegistry::new());
        register(&registry, "echo");
        let entries = Catalog::new(registry).describe();
        assert_eq!(
            entries,
            vec![CatalogEntry {
                name: "echo".into(),
                entrypoint: "run".into(),
                description: "echo tool".into(),
            }]
        );
    }
}
