use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use serde_json::{Value, json};
use toolsmith_adapters::traits::{
    AdapterMetadata, AdapterResult, AdapterStream, InferenceChunk, InferenceRequest, MessageRole,
    ModelAdapter, ToolCall,
};
use toolsmith_kernel::{AgentLoop, CollectingObserver, KernelError, TurnEvent};
use toolsmith_tools::CapabilityEngine;
use toolsmith_tools::artifacts::ArtifactStore;
use toolsmith_tools::installer::{EnvironmentError, PackageEnvironment};
use toolsmith_tools::registry::{Arguments, Invocable, InvocationError};
use toolsmith_tools::runtime::{LoadError, ScriptRuntime, SourceUnit};

/// Adapter replaying a fixed list of model turns.
struct ScriptedAdapter {
    metadata: AdapterMetadata,
    turns: Mutex<VecDeque<InferenceChunk>>,
    requests: Mutex<Vec<InferenceRequest>>,
}

impl ScriptedAdapter {
    fn new(turns: Vec<InferenceChunk>) -> Arc<Self> {
        Arc::new(Self {
            metadata: AdapterMetadata::new("scripted", "scenario"),
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ModelAdapter for ScriptedAdapter {
    fn metadata(&self) -> &AdapterMetadata {
        &self.metadata
    }

    async fn infer(&self, request: InferenceRequest) -> AdapterResult<AdapterStream> {
        self.requests.lock().unwrap().push(request);
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .expect("model asked for more turns than scripted");
        let delta = turn.delta.clone();
        let split = InferenceChunk::new(delta, false);
        let last = InferenceChunk::new("", true).with_tool_calls(turn.tool_calls);
        Ok(Box::pin(stream::iter(vec![Ok(split), Ok(last)])))
    }
}

/// Runtime accepting any source that mentions `def <entrypoint>`; the bound
/// callable returns its `msg` argument.
struct EchoRuntime;

#[async_trait]
impl ScriptRuntime for EchoRuntime {
    fn language(&self) -> &'static str {
        "python"
    }

    fn extension(&self) -> &'static str {
        "py"
    }

    fn package_marker(&self) -> Option<&'static str> {
        Some("__init__.py")
    }

    async fn load(&self, unit: SourceUnit) -> Result<Arc<dyn Invocable>, LoadError> {
        if !unit.source().contains(&format!("def {}", unit.entrypoint())) {
            return Err(LoadError::MissingEntrypoint {
                entrypoint: unit.entrypoint().to_owned(),
            });
        }
        Ok(Arc::new(|args: Arguments| async move {
            args.get("msg")
                .cloned()
                .ok_or_else(|| InvocationError::raised("TypeError", "missing argument 'msg'"))
        }))
    }
}

struct SystemPython;

#[async_trait]
impl PackageEnvironment for SystemPython {
    async fn is_isolated(&self) -> Result<bool, EnvironmentError> {
        Ok(false)
    }

    async fn has_package_manager(&self) -> Result<bool, EnvironmentError> {
        Ok(true)
    }

    async fn bootstrap_package_manager(&self) -> Result<(), EnvironmentError> {
        Ok(())
    }

    async fn is_installed(&self, _dependency: &str) -> Result<bool, EnvironmentError> {
        Ok(false)
    }

    async fn install(&self, _requirement: &str) -> Result<(), EnvironmentError> {
        panic!("installation must not be attempted outside a virtual environment")
    }
}

async fn engine(dir: &std::path::Path) -> Arc<CapabilityEngine> {
    let artifacts = ArtifactStore::open(dir.join("runtime_tools"), Some("__init__.py"))
        .await
        .unwrap();
    Arc::new(CapabilityEngine::new(
        Arc::new(EchoRuntime),
        Arc::new(SystemPython),
        artifacts,
    ))
}

fn turn(thought: &str, calls: Vec<ToolCall>) -> InferenceChunk {
    InferenceChunk::new(thought, true).with_tool_calls(calls)
}

fn tool_messages(request: &InferenceRequest) -> Vec<String> {
    request
        .messages()
        .iter()
        .filter(|message| message.role() == MessageRole::Tool)
        .map(|message| message.content().to_owned())
        .collect()
}

const ECHO_SOURCE: &str = "def run_echo(*, msg, **kwargs):\n    return msg\n";

#[tokio::test]
async fn model_creates_and_calls_a_tool() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path()).await;
    let adapter = ScriptedAdapter::new(vec![
        turn(
            "ToolMissing",
            vec![
                ToolCall::new("c1", "list_tools", json!({})),
                ToolCall::new(
                    "c2",
                    "create_tool",
                    json!({
                        "tool_name": "echo",
                        "code": ECHO_SOURCE,
                        "entrypoint": "run_echo",
                        "description": "Echo msg"
                    }),
                ),
            ],
        ),
        turn(
            "",
            vec![
                ToolCall::new("c3", "dynamic_tool", json!({"tool_name": "echo", "msg": "hi"})),
                ToolCall::new(
                    "c4",
                    "dynamic_tool",
                    json!({"tool_name": "echo", "kwargs": {"msg": "hi"}}),
                ),
                ToolCall::new("c5", "install_dependency", json!({"dependency": "requests"})),
            ],
        ),
        turn("The tool says hi", Vec::new()),
    ]);
    let observer = CollectingObserver::new();
    let agent = AgentLoop::new(adapter.clone(), engine.clone()).with_observer(observer.clone());

    let outcome = agent.run("Create an echo tool and call it").await.unwrap();

    assert_eq!(outcome.answer(), "The tool says hi");
    assert_eq!(outcome.steps(), 3);
    assert_eq!(engine.list_tools().names(), ["echo"]);
    assert!(dir.path().join("runtime_tools/echo.py").exists());

    let requests = adapter.requests.lock().unwrap();
    assert_eq!(requests.len(), 3);
    assert_eq!(
        tool_messages(&requests[2]),
        vec![
            "[]".to_owned(),
            "Tool 'echo' registered. Entrypoint: 'run_echo'. Description: Echo msg".to_owned(),
            "hi".to_owned(),
            "hi".to_owned(),
            "Error: not running inside a virtual environment.".to_owned(),
        ]
    );

    let events = observer.drain();
    assert!(matches!(
        events.last(),
        Some(TurnEvent::Finished { steps: 3, answer, .. }) if answer == "The tool says hi"
    ));
}

#[tokio::test]
async fn failing_tool_calls_do_not_end_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path()).await;
    let adapter = ScriptedAdapter::new(vec![
        turn(
            "",
            vec![ToolCall::new(
                "c1",
                "create_tool",
                json!({
                    "tool_name": "echo",
                    "code": ECHO_SOURCE,
                    "entrypoint": "run_echo",
                    "description": "Echo msg"
                }),
            )],
        ),
        turn(
            "",
            vec![ToolCall::new("c2", "dynamic_tool", json!({"tool_name": "echo"}))],
        ),
        turn(
            "",
            vec![ToolCall::new("c3", "dynamic_tool", json!({"tool_name": "echo", "msg": 7}))],
        ),
        turn("done", Vec::new()),
    ]);
    let agent = AgentLoop::new(adapter.clone(), engine.clone());

    let outcome = agent.run("call echo").await.unwrap();
    assert_eq!(outcome.answer(), "done");

    let requests = adapter.requests.lock().unwrap();
    let observations = tool_messages(&requests[3]);
    assert_eq!(
        observations[1],
        "Failed to call this tool. Reason: TypeError: missing argument 'msg'"
    );
    assert_eq!(observations[2], Value::from(7).to_string());
}

#[tokio::test]
async fn creating_a_tool_without_its_entrypoint_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path()).await;
    let adapter = ScriptedAdapter::new(vec![turn(
        "",
        vec![ToolCall::new(
            "c1",
            "create_tool",
            json!({
                "tool_name": "echo",
                "code": "def something_else():\n    pass\n",
                "entrypoint": "run_echo",
                "description": "Echo msg"
            }),
        )],
    )]);
    let agent = AgentLoop::new(adapter, engine.clone());

    let err = agent.run("make echo").await.expect_err("run aborts");

    assert!(matches!(err, KernelError::Tool { .. }));
    assert!(err.to_string().contains("run_echo"));
    assert!(engine.registry().is_empty());
}
