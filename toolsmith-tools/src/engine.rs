//! Engine facade exposing the four model-facing operations.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::artifacts::ArtifactStore;
use crate::catalog::{Catalog, Listing};
use crate::dispatcher::{DispatchOutcome, DispatchRequest, Dispatcher};
use crate::error::{ToolError, ToolResult};
use crate::installer::{DependencyInstaller, InstallOutcome, PackageEnvironment};
use crate::python::{PythonEnvironment, PythonRuntime, default_interpreter};
use crate::registry::CapabilityRegistry;
use crate::runtime::ScriptRuntime;
use crate::synthesizer::{SynthesisOutcome, SynthesisRequest, Synthesizer};

/// Directory used for capability artifacts when none is configured.
pub const DEFAULT_TOOL_DIR: &str = "runtime_tools";

/// Settings for a Python-backed engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    tool_dir: PathBuf,
    interpreter: PathBuf,
    invocation_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tool_dir: PathBuf::from(DEFAULT_TOOL_DIR),
            interpreter: default_interpreter(),
            invocation_timeout: None,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration writing artifacts under `tool_dir`.
    #[must_use]
    pub fn new(tool_dir: impl Into<PathBuf>) -> Self {
        Self {
            tool_dir: tool_dir.into(),
            ..Self::default()
        }
    }

    /// Overrides the interpreter.
    #[must_use]
    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    /// Bounds every dispatch by `timeout`.
    #[must_use]
    pub fn with_invocation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.invocation_timeout = timeout;
        self
    }

    /// Returns the artifact directory.
    #[must_use]
    pub fn tool_dir(&self) -> &Path {
        &self.tool_dir
    }

    /// Returns the interpreter path.
    #[must_use]
    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    /// Returns the per-dispatch timeout, if any.
    #[must_use]
    pub const fn invocation_timeout(&self) -> Option<Duration> {
        self.invocation_timeout
    }
}

/// Operations offered to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Install a package into the isolated environment.
    InstallDependency,
    /// Author and register a new capability.
    CreateTool,
    /// Invoke a registered capability by name.
    DynamicTool,
    /// List registered capability names.
    ListTools,
}

impl Operation {
    /// Every operation, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::DynamicTool,
        Self::ListTools,
        Self::CreateTool,
        Self::InstallDependency,
    ];

    /// Wire name of the operation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InstallDependency => "install_dependency",
            Self::CreateTool => "create_tool",
            Self::DynamicTool => "dynamic_tool",
            Self::ListTools => "list_tools",
        }
    }

    /// Description sent to the model alongside the schema.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::InstallDependency => {
                "Install a Python package ONLY inside a virtual environment. \
                 Use before creating a tool that imports a third-party package."
            }
            Self::CreateTool => {
                "Create a Python tool as a module, load it, and register it under tool_name. \
                 The entrypoint must name a function (keyword-only parameters, accept **kwargs) \
                 defined in code."
            }
            Self::DynamicTool => {
                "Dynamically call a registered tool by tool_name. Pass the tool's arguments \
                 as additional named arguments, or nested under kwargs."
            }
            Self::ListTools => "List the names of the registered dynamic tools.",
        }
    }

    /// JSON schema of the operation's arguments.
    #[must_use]
    pub fn parameters(self) -> Value {
        match self {
            Self::InstallDependency => json!({
                "type": "object",
                "properties": {
                    "dependency": {
                        "type": "string",
                        "description": "Package name as understood by pip."
                    },
                    "version": {
                        "type": "string",
                        "description": "Exact version to pin."
                    }
                },
                "required": ["dependency"]
            }),
            Self::CreateTool => json!({
                "type": "object",
                "properties": {
                    "tool_name": {
                        "type": "string",
                        "description": "Identifier the tool is registered under."
                    },
                    "code": {
                        "type": "string",
                        "description": "Complete Python source of the tool module."
                    },
                    "entrypoint": {
                        "type": "string",
                        "description": "Name of the function in code to call."
                    },
                    "description": {
                        "type": "string",
                        "description": "What the tool does and which arguments it takes."
                    }
                },
                "required": ["tool_name", "code", "entrypoint", "description"]
            }),
            Self::DynamicTool => json!({
                "type": "object",
                "properties": {
                    "tool_name": {
                        "type": "string",
                        "description": "Name of a tool returned by list_tools."
                    },
                    "kwargs": {
                        "type": "object",
                        "description": "Named arguments for the tool."
                    }
                },
                "required": ["tool_name"],
                "additionalProperties": true
            }),
            Self::ListTools => json!({
                "type": "object",
                "properties": {}
            }),
        }
    }

    /// Declaration of the operation for a model request.
    #[must_use]
    pub fn spec(self) -> OperationSpec {
        OperationSpec {
            name: self.as_str(),
            description: self.description(),
            parameters: self.parameters(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ToolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|operation| operation.as_str() == value)
            .ok_or_else(|| ToolError::UnknownOperation {
                name: value.to_owned(),
            })
    }
}

/// Declaration of one operation: name, description, and argument schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationSpec {
    /// Wire name.
    pub name: &'static str,
    /// Model-facing description.
    pub description: &'static str,
    /// JSON schema of the arguments.
    pub parameters: Value,
}

#[derive(Deserialize)]
struct InstallArgs {
    dependency: String,
    #[serde(default)]
    version: Option<Value>,
}

#[derive(Deserialize)]
struct CreateArgs {
    tool_name: String,
    code: String,
    entrypoint: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct DispatchArgs {
    tool_name: String,
    #[serde(flatten)]
    arguments: Map<String, Value>,
}

/// Ties the registry, installer, synthesizer, dispatcher, and catalog
/// together behind the operations offered to the model.
pub struct CapabilityEngine {
    registry: Arc<CapabilityRegistry>,
    installer: DependencyInstaller,
    synthesizer: Synthesizer,
    dispatcher: Dispatcher,
    catalog: Catalog,
}

impl fmt::Debug for CapabilityEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityEngine")
            .field("registry", &self.registry)
            .field("synthesizer", &self.synthesizer)
            .finish_non_exhaustive()
    }
}

impl CapabilityEngine {
    /// Creates an engine with a fresh registry.
    #[must_use]
    pub fn new(
        runtime: Arc<dyn ScriptRuntime>,
        environment: Arc<dyn PackageEnvironment>,
        artifacts: ArtifactStore,
    ) -> Self {
        let registry = Arc::new(CapabilityRegistry::new());
        Self {
            installer: DependencyInstaller::new(environment),
            synthesizer: Synthesizer::new(registry.clone(), runtime, artifacts),
            dispatcher: Dispatcher::new(registry.clone()),
            catalog: Catalog::new(registry.clone()),
            registry,
        }
    }

    /// Creates an engine driving CPython, preparing the artifact directory.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Io`] when the artifact directory cannot be created.
    pub async fn python(config: &EngineConfig) -> ToolResult<Self> {
        let runtime = PythonRuntime::new(config.interpreter());
        let environment = PythonEnvironment::new(config.interpreter());
        let artifacts = ArtifactStore::open(config.tool_dir(), runtime.package_marker()).await?;
        Ok(Self::new(Arc::new(runtime), Arc::new(environment), artifacts)
            .with_invocation_timeout(config.invocation_timeout()))
    }

    /// Bounds every dispatch by `timeout`.
    #[must_use]
    pub fn with_invocation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.dispatcher = self.dispatcher.with_timeout(timeout);
        self
    }

    /// Returns the shared registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Returns the directory capability artifacts are written to.
    #[must_use]
    pub fn tool_dir(&self) -> &Path {
        self.synthesizer.artifacts().root()
    }

    /// Returns the language capabilities are authored in.
    #[must_use]
    pub fn language(&self) -> &'static str {
        self.synthesizer.runtime().language()
    }

    /// Declarations of every operation, for model requests.
    #[must_use]
    pub fn operations(&self) -> Vec<OperationSpec> {
        Operation::ALL.into_iter().map(Operation::spec).collect()
    }

    /// Installs a dependency. See [`DependencyInstaller::install`].
    pub async fn install_dependency(
        &self,
        dependency: &str,
        version: Option<&str>,
    ) -> InstallOutcome {
        self.installer.install(dependency, version).await
    }

    /// Synthesizes a capability. See [`Synthesizer::synthesize`].
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::EntrypointNotFound`] when the source does not
    /// declare the entrypoint.
    pub async fn create_tool(&self, request: SynthesisRequest) -> ToolResult<SynthesisOutcome> {
        self.synthesizer.synthesize(request).await
    }

    /// Invokes a capability. See [`Dispatcher::dispatch`].
    pub async fn dispatch(&self, request: DispatchRequest) -> DispatchOutcome {
        self.dispatcher.dispatch(request).await
    }

    /// Lists registered capability names.
    #[must_use]
    pub fn list_tools(&self) -> Listing {
        self.catalog.list()
    }

    /// Returns the catalog over the registry.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Runs the operation named `name` with JSON arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::UnknownOperation`] for names outside the four
    /// operations, plus everything [`CapabilityEngine::handle`] returns.
    pub async fn handle_named(&self, name: &str, arguments: Value) -> ToolResult<Value> {
        let operation = name.parse::<Operation>()?;
        self.handle(operation, arguments).await
    }

    /// Runs `operation` with JSON arguments and returns the observation.
    ///
    /// Unexpected extra arguments are ignored. `null` stands for no
    /// arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidArguments`] when the arguments do not decode
    /// and [`ToolError::EntrypointNotFound`] from synthesis.
    pub async fn handle(&self, operation: Operation, arguments: Value) -> ToolResult<Value> {
        let arguments = match arguments {
            Value::Null => Value::Object(Map::new()),
            Value::Object(map) => Value::Object(map),
            other => {
                return Err(ToolError::invalid_arguments(
                    operation.as_str(),
                    format!("expected an object, got {other}"),
                ));
            }
        };
        debug!(operation = %operation, "handling operation");

        match operation {
            Operation::InstallDependency => {
                let args: InstallArgs = decode(operation, arguments)?;
                let version = match args.version {
                    None | Some(Value::Null) => None,
                    Some(Value::String(text)) => Some(text),
                    // A JSON number has already lost trailing zeros (2.10 -> 2.1).
                    Some(other) => {
                        return Err(ToolError::invalid_arguments(
                            operation.as_str(),
                            format!("version must be a string, got {other}"),
                        ));
                    }
                };
                let outcome = self
                    .install_dependency(&args.dependency, version.as_deref())
                    .await;
                Ok(Value::String(outcome.to_string()))
            }
            Operation::CreateTool => {
                let args: CreateArgs = decode(operation, arguments)?;
                let request = SynthesisRequest::new(args.tool_name, args.code, args.entrypoint)
                    .with_description(args.description);
                let outcome = self.create_tool(request).await?;
                Ok(Value::String(outcome.to_string()))
            }
            Operation::DynamicTool => {
                let args: DispatchArgs = decode(operation, arguments)?;
                let request = DispatchRequest::new(args.tool_name).with_arguments(args.arguments);
                Ok(self.dispatch(request).await.into_value())
            }
            Operation::ListTools => Ok(Value::Array(
                self.list_tools()
                    .into_names()
                    .into_iter()
                    .map(Value::String)
                    .collect(),
            )),
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(operation: Operation, arguments: Value) -> ToolResult<T> {
    serde_json::from_value(arguments)
        .map_err(|err| ToolError::invalid_arguments(operation.as_str(), err.to_string()))
}
