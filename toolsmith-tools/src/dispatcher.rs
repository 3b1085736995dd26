//! Name-based invocation of registered capabilities.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::registry::{Arguments, CapabilityRegistry, InvocationError};

/// Key under which some callers nest the real argument bag.
pub const NESTED_ARGUMENTS_KEY: &str = "kwargs";

/// Request to invoke a capability by name.
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchRequest {
    name: String,
    arguments: Arguments,
}

impl DispatchRequest {
    /// Creates a request with no arguments.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Map::new(),
        }
    }

    /// Replaces the argument bag.
    #[must_use]
    pub fn with_arguments(mut self, arguments: Arguments) -> Self {
        self.arguments = arguments;
        self
    }

    /// Adds a single named argument.
    #[must_use]
    pub fn with_argument(mut self, key: impl Into<String>, value: Value) -> Self {
        self.arguments.insert(key.into(), value);
        self
    }

    /// Returns the target capability name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the raw argument bag.
    #[must_use]
    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }
}

/// Collapses the `{"kwargs": {...}}` wrapping into the inner object.
///
/// When `kwargs` is present and holds an object, that object becomes the
/// whole argument bag and sibling keys are dropped. A `null` value yields an
/// empty bag. Any other value is left untouched as an ordinary argument.
#[must_use]
pub fn normalize_arguments(mut arguments: Arguments) -> Arguments {
    let nested = match arguments.get(NESTED_ARGUMENTS_KEY) {
        Some(Value::Object(_) | Value::Null) => arguments.remove(NESTED_ARGUMENTS_KEY),
        _ => None,
    };
    match nested {
        Some(Value::Object(inner)) => inner,
        Some(_) => Map::new(),
        None => arguments,
    }
}

/// Reported result of a dispatch.
#[derive(Clone, Debug, PartialEq)]
pub enum DispatchOutcome {
    /// The capability returned normally.
    Completed(Value),
    /// No capability is registered under the name.
    UnknownCapability {
        /// Requested name.
        name: String,
        /// Names registered at the time of the call.
        known: Vec<String>,
    },
    /// The capability failed while running.
    Failed {
        /// Capability name.
        name: String,
        /// Failure description.
        reason: String,
    },
}

impl DispatchOutcome {
    /// Converts the outcome into the value handed back to the model.
    ///
    /// Completed results pass through unchanged; every other outcome becomes
    /// its text rendering.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Completed(value) => value,
            other => Value::String(other.to_string()),
        }
    }
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed(Value::String(text)) => f.write_str(text),
            Self::Completed(value) => write!(f, "{value}"),
            Self::UnknownCapability { name, known } => {
                write!(f, "Error: unknown tool '{name}'. Known tools: ")?;
                if known.is_empty() {
                    f.write_str("none")
                } else {
                    write!(f, "[{}]", known.join(", "))
                }
            }
            Self::Failed { reason, .. } => {
                write!(f, "Failed to call this tool. Reason: {reason}")
            }
        }
    }
}

/// Routes invocation requests to registered capabilities.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    timeout: Option<Duration>,
}

impl Dispatcher {
    /// Creates a dispatcher over `registry` with no time limit.
    #[must_use]
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            registry,
            timeout: None,
        }
    }

    /// Bounds each invocation by `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Looks the capability up, normalizes the arguments, and invokes it.
    ///
    /// Failures never escape: they are reported as
    /// [`DispatchOutcome::UnknownCapability`] or [`DispatchOutcome::Failed`].
    pub async fn dispatch(&self, request: DispatchRequest) -> DispatchOutcome {
        let DispatchRequest { name, arguments } = request;

        let Some(capability) = self.registry.lookup(&name) else {
            let known = self.registry.names();
            warn!(capability = %name, known = known.len(), "dispatch to unknown capability");
            return DispatchOutcome::UnknownCapability { name, known };
        };

        let arguments = normalize_arguments(arguments);
        debug!(capability = %name, arguments = arguments.len(), "dispatching capability");

        let result = match self.timeout {
            Some(after) => tokio::time::timeout(after, capability.invoke(arguments))
                .await
                .unwrap_or(Err(InvocationError::TimedOut { after })),
            None => capability.invoke(arguments).await,
        };

        match result {
            Ok(value) => DispatchOutcome::Completed(value),
            Err(err) => {
                warn!(capability = %name, error = %err, "capability invocation failed");
                DispatchOutcome::Failed {
                    name,
                    reason: err.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use toolsmith_primitives::CapabilityName;

    use crate::registry::Capability;

    fn registry_with(capabilities: Vec<Capability>) -> Arc<CapabilityRegistry> {
        let registry = Arc::new(CapabilityRegistry::new());
        for capability in capabilities {
            registry.register(capability);
        }
        registry
    }

    fn echo() -> Capability {
        Capability::new(
            CapabilityName::new("echo").unwrap(),
            "run_echo",
            "echo msg",
            Arc::new(|args: Arguments| async move {
                args.get("msg")
                    .cloned()
                    .ok_or_else(|| InvocationError::raised("TypeError", "missing 'msg'"))
            }),
        )
    }

    fn divide() -> Capability {
        Capability::new(
            CapabilityName::new("divide").unwrap(),
            "run",
            "divides a by b",
            Arc::new(|args: Arguments| async move {
                let a = args.get("a").and_then(Value::as_i64).unwrap_or_default();
                let b = args.get("b").and_then(Value::as_i64).unwrap_or_default();
                if b == 0 {
                    return Err(InvocationError::raised("ZeroDivisionError", "division by zero"));
                }
                Ok(json!(a / b))
            }),
        )
    }

    #[tokio::test]
    async fn completes_with_flat_arguments() {
        let dispatcher = Dispatcher::new(registry_with(vec![echo()]));
        let outcome = dispatcher
            .dispatch(DispatchRequest::new("echo").with_argument("msg", json!("hi")))
            .await;
        assert_eq!(outcome, DispatchOutcome::Completed(json!("hi")));
        assert_eq!(outcome.to_string(), "hi");
    }

    #[tokio::test]
    async fn nested_kwargs_are_unwrapped() {
        let dispatcher = Dispatcher::new(registry_with(vec![echo()]));

        let flat = dispatcher
            .dispatch(DispatchRequest::new("echo").with_argument("msg", json!("hi")))
            .await;
        let nested = dispatcher
            .dispatch(DispatchRequest::new("echo").with_argument("kwargs", json!({"msg": "hi"})))
            .await;

        assert_eq!(flat, nested);
    }

    #[tokio::test]
    async fn unknown_capability_lists_known_names() {
        let dispatcher = Dispatcher::new(registry_with(vec![echo(), divide()]));

        let outcome = dispatcher.dispatch(DispatchRequest::new("nope")).await;
        let text = outcome.to_string();

        assert!(text.contains("nope"));
        assert!(text.contains("echo"));
        assert!(text.contains("divide"));
        assert_eq!(text, "Error: unknown tool 'nope'. Known tools: [echo, divide]");
    }

    #[tokio::test]
    async fn unknown_capability_on_empty_registry() {
        let dispatcher = Dispatcher::new(Arc::new(CapabilityRegistry::new()));
        let outcome = dispatcher.dispatch(DispatchRequest::new("echo")).await;
        assert_eq!(
            outcome.into_value(),
            json!("Error: unknown tool 'echo'. Known tools: none")
        );
    }

    #[tokio::test]
    async fn failures_are_contained_and_later_calls_succeed() {
        let registry = registry_with(vec![divide()]);
        let dispatcher = Dispatcher::new(registry.clone());

        let failed = dispatcher
            .dispatch(
                DispatchRequest::new("divide")
                    .with_argument("a", json!(1))
                    .with_argument("b", json!(0)),
            )
            .await;
        assert_eq!(
            failed.to_string(),
            "Failed to call this tool. Reason: ZeroDivisionError: division by zero"
        );

        let ok = dispatcher
            .dispatch(
                DispatchRequest::new("divide")
                    .with_argument("a", json!(6))
                    .with_argument("b", json!(3)),
            )
            .await;
        assert_eq!(ok, DispatchOutcome::Completed(json!(2)));
        assert_eq!(registry.names(), vec!["divide"]);
    }

    #[tokio::test]
    async fn missing_argument_is_a_contained_failure() {
        let dispatcher = Dispatcher::new(registry_with(vec![echo()]));
        let outcome = dispatcher.dispatch(DispatchRequest::new("echo")).await;
        assert!(matches!(outcome, DispatchOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn timeout_is_reported_as_failure() {
        let slow = Capability::new(
            CapabilityName::new("slow").unwrap(),
            "run",
            "sleeps",
            Arc::new(|_args: Arguments| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, InvocationError>(Value::Null)
            }),
        );
        let dispatcher = Dispatcher::new(registry_with(vec![slow]))
            .with_timeout(Some(Duration::from_millis(20)));

        let outcome = dispatcher.dispatch(DispatchRequest::new("slow")).await;
        match outcome {
            DispatchOutcome::Failed { name, reason } => {
                assert_eq!(name, "slow");
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn normalization_rules() {
        let mut wrapped = Arguments::new();
        wrapped.insert("kwargs".into(), json!({"x": 1}));
        wrapped.insert("ignored".into(), json!(true));
        assert_eq!(Value::Object(normalize_arguments(wrapped)), json!({"x": 1}));

        let mut null = Arguments::new();
        null.insert("kwargs".into(), Value::Null);
        assert!(normalize_arguments(null).is_empty());

        let mut scalar = Arguments::new();
        scalar.insert("kwargs".into(), json!("plain"));
        assert_eq!(
            Value::Object(normalize_arguments(scalar)),
            json!({"kwargs": "plain"})
        );
    }

    #[test]
    fn structured_results_render_as_json() {
        let outcome = DispatchOutcome::Completed(json!({"sum": 3}));
        assert_eq!(outcome.to_string(), r#"{"sum":3}"#);
    }
}
