//! Conversation loop driving the model through capability operations.

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use toolsmith_adapters::traits::{
    AdapterError, InferenceRequest, MessageRole, ModelAdapter, PromptMessage, ToolCall, ToolSpec,
};
use toolsmith_primitives::RunId;
use toolsmith_tools::{CapabilityEngine, OperationSpec};
use tracing::{info, warn};

use crate::error::{KernelError, KernelResult};
use crate::observer::{TracingTurnObserver, TurnEvent, TurnObserver};
use crate::prompt::SYSTEM_PROMPT;

/// Model turns allowed per run when none is configured.
pub const DEFAULT_MAX_STEPS: usize = 25;

/// Sampling temperature used when none is configured.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Settings applied to every model request of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    system_prompt: String,
    temperature: Option<f32>,
    max_output_tokens: Option<u32>,
    max_steps: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            system_prompt: SYSTEM_PROMPT.to_owned(),
            temperature: Some(DEFAULT_TEMPERATURE),
            max_output_tokens: None,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

impl LoopConfig {
    /// Replaces the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Sets the sampling temperature; `None` defers to the adapter.
    #[must_use]
    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Caps the tokens generated per model turn.
    #[must_use]
    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    /// Sets the number of model turns allowed per run. Zero is raised to one.
    #[must_use]
    pub fn with_max_steps(mut self, steps: usize) -> Self {
        self.max_steps = steps.max(1);
        self
    }

    /// Returns the system prompt.
    #[must_use]
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Returns the configured temperature.
    #[must_use]
    pub const fn temperature(&self) -> Option<f32> {
        self.temperature
    }

    /// Returns the step limit.
    #[must_use]
    pub const fn max_steps(&self) -> usize {
        self.max_steps
    }
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    run_id: RunId,
    answer: String,
    steps: usize,
    transcript: Vec<PromptMessage>,
}

impl RunOutcome {
    /// Returns the identifier of the run.
    #[must_use]
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Returns the model's final answer.
    #[must_use]
    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// Returns the number of model turns taken.
    #[must_use]
    pub const fn steps(&self) -> usize {
        self.steps
    }

    /// Returns the full conversation, final answer included.
    #[must_use]
    pub fn transcript(&self) -> &[PromptMessage] {
        &self.transcript
    }
}

/// Drives a [`ModelAdapter`] against a [`CapabilityEngine`] until the model
/// stops requesting operations.
///
/// Operations run one at a time, in the order the model requested them.
pub struct AgentLoop {
    adapter: Arc<dyn ModelAdapter>,
    engine: Arc<CapabilityEngine>,
    config: LoopConfig,
    observer: Arc<dyn TurnObserver>,
    tools: Vec<ToolSpec>,
}

impl fmt::Debug for AgentLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metadata = self.adapter.metadata();
        f.debug_struct("AgentLoop")
            .field("provider", &metadata.provider())
            .field("model", &metadata.model())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AgentLoop {
    /// Creates a loop with the default configuration and a tracing observer.
    #[must_use]
    pub fn new(adapter: Arc<dyn ModelAdapter>, engine: Arc<CapabilityEngine>) -> Self {
        let tools = engine.operations().into_iter().map(tool_spec).collect();
        Self {
            adapter,
            engine,
            config: LoopConfig::default(),
            observer: Arc::new(TracingTurnObserver),
            tools,
        }
    }

    /// Replaces the loop configuration.
    #[must_use]
    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn TurnObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Returns the engine operations are executed against.
    #[must_use]
    pub fn engine(&self) -> &Arc<CapabilityEngine> {
        &self.engine
    }

    /// Runs the conversation seeded with `input` to completion.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Adapter`] when the model cannot be reached,
    /// [`KernelError::Tool`] when an operation fails fatally (a created tool
    /// whose entrypoint does not exist), and
    /// [`KernelError::StepLimitExceeded`] when the model is still requesting
    /// operations after the configured number of turns.
    pub async fn run(&self, input: impl Into<String>) -> KernelResult<RunOutcome> {
        let run_id = RunId::random();
        let mut messages = vec![PromptMessage::new(MessageRole::User, input)];
        info!(%run_id, model = %self.adapter.metadata().model(), "agent run started");

        for step in 1..=self.config.max_steps {
            let (content, tool_calls) = self.complete(&messages).await?;
            self.observer.record(TurnEvent::ModelResponded {
                run_id,
                step,
                content: content.clone(),
                operations: tool_calls.iter().map(|call| call.name.clone()).collect(),
            });

            if tool_calls.is_empty() {
                messages.push(PromptMessage::new(MessageRole::Assistant, content.clone()));
                self.observer.record(TurnEvent::Finished {
                    run_id,
                    steps: step,
                    answer: content.clone(),
                });
                return Ok(RunOutcome {
                    run_id,
                    answer: content,
                    steps: step,
                    transcript: messages,
                });
            }

            messages.push(PromptMessage::assistant_tool_calls(
                content,
                tool_calls.clone(),
            ));
            for call in tool_calls {
                let observation = self.execute(&call).await?;
                self.observer.record(TurnEvent::OperationCompleted {
                    run_id,
                    step,
                    operation: call.name.clone(),
                    observation: observation.clone(),
                });
                messages.push(PromptMessage::tool_result(call.id, observation));
            }
        }

        warn!(%run_id, limit = self.config.max_steps, "step limit reached");
        Err(KernelError::StepLimitExceeded {
            limit: self.config.max_steps,
        })
    }

    async fn complete(&self, messages: &[PromptMessage]) -> KernelResult<(String, Vec<ToolCall>)> {
        let mut request = InferenceRequest::new(messages.to_vec())
            .map_err(|err| self.adapter_error(err))?
            .with_system_prompt(self.config.system_prompt.clone())
            .with_tools(self.tools.clone());
        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(tokens) = self.config.max_output_tokens {
            request = request.with_max_output_tokens(tokens);
        }

        let mut stream = self
            .adapter
            .infer(request)
            .await
            .map_err(|err| self.adapter_error(err))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| self.adapter_error(err))?;
            content.push_str(&chunk.delta);
            tool_calls.extend(chunk.tool_calls);
            if chunk.done {
                break;
            }
        }

        Ok((content, tool_calls))
    }

    async fn execute(&self, call: &ToolCall) -> KernelResult<String> {
        match self
            .engine
            .handle_named(&call.name, call.arguments.clone())
            .await
        {
            Ok(value) => Ok(render(value)),
            Err(err) if err.is_fatal() => Err(KernelError::Tool {
                operation: call.name.clone(),
                source: err,
            }),
            Err(err) => {
                warn!(operation = %call.name, error = %err, "operation request rejected");
                Ok(format!("Error: {err}"))
            }
        }
    }

    fn adapter_error(&self, source: AdapterError) -> KernelError {
        let metadata = self.adapter.metadata();
        KernelError::Adapter {
            provider: metadata.provider(),
            model: metadata.model().to_owned(),
            source,
        }
    }
}

fn tool_spec(spec: OperationSpec) -> ToolSpec {
    ToolSpec::new(spec.name, spec.description, spec.parameters)
}

/// Renders an operation result as message content: strings verbatim,
/// everything else as JSON.
fn render(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures::stream;
    use serde_json::json;
    use toolsmith_adapters::traits::{
        AdapterMetadata, AdapterResult, AdapterStream, InferenceChunk,
    };
    use toolsmith_tools::artifacts::ArtifactStore;
    use toolsmith_tools::installer::{EnvironmentError, PackageEnvironment};
    use toolsmith_tools::registry::Invocable;
    use toolsmith_tools::runtime::{LoadError, ScriptRuntime, SourceUnit};

    use crate::observer::CollectingObserver;

    struct ScriptedAdapter {
        metadata: AdapterMetadata,
        replies: Mutex<VecDeque<AdapterResult<InferenceChunk>>>,
        requests: Mutex<Vec<InferenceRequest>>,
    }

    impl ScriptedAdapter {
        fn new(replies: Vec<AdapterResult<InferenceChunk>>) -> Arc<Self> {
            Arc::new(Self {
                metadata: AdapterMetadata::new("scripted", "test-model"),
                replies: Mutex::new(replies.into()),
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
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(InferenceChunk::new("out of script", true)));
            let chunk = reply?;
            Ok(Box::pin(stream::once(async move { Ok(chunk) })))
        }
    }

    struct NoRuntime;

    #[async_trait]
    impl ScriptRuntime for NoRuntime {
        fn language(&self) -> &'static str {
            "none"
        }

        fn extension(&self) -> &'static str {
            "txt"
        }

        async fn load(&self, unit: SourceUnit) -> Result<Arc<dyn Invocable>, LoadError> {
            Err(LoadError::MissingEntrypoint {
                entrypoint: unit.entrypoint().to_owned(),
            })
        }
    }

    struct NoEnvironment;

    #[async_trait]
    impl PackageEnvironment for NoEnvironment {
        async fn is_isolated(&self) -> Result<bool, EnvironmentError> {
            Ok(false)
        }

        async fn has_package_manager(&self) -> Result<bool, EnvironmentError> {
            Ok(false)
        }

        async fn bootstrap_package_manager(&self) -> Result<(), EnvironmentError> {
            Err(EnvironmentError::new("unavailable"))
        }

        async fn is_installed(&self, _dependency: &str) -> Result<bool, EnvironmentError> {
            Ok(false)
        }

        async fn install(&self, _requirement: &str) -> Result<(), EnvironmentError> {
            Err(EnvironmentError::new("unavailable"))
        }
    }

    async fn engine(dir: &Path) -> Arc<CapabilityEngine> {
        let artifacts = ArtifactStore::open(dir, None).await.unwrap();
        Arc::new(CapabilityEngine::new(
            Arc::new(NoRuntime),
            Arc::new(NoEnvironment),
            artifacts,
        ))
    }

    fn call(id: &str, name: &str, arguments: Value) -> InferenceChunk {
        InferenceChunk::new("", true).with_tool_calls(vec![ToolCall::new(id, name, arguments)])
    }

    #[tokio::test]
    async fn returns_text_answer_without_operations() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = ScriptedAdapter::new(vec![Ok(InferenceChunk::new("hello", true))]);
        let agent = AgentLoop::new(adapter.clone(), engine(dir.path()).await);

        let outcome = agent.run("hi").await.unwrap();

        assert_eq!(outcome.answer(), "hello");
        assert_eq!(outcome.steps(), 1);
        assert_eq!(outcome.transcript().len(), 2);

        let requests = adapter.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.system_prompt(), Some(SYSTEM_PROMPT));
        assert_eq!(request.temperature(), Some(DEFAULT_TEMPERATURE));
        let names: Vec<_> = request.tools().iter().map(ToolSpec::name).collect();
        assert_eq!(
            names,
            ["dynamic_tool", "list_tools", "create_tool", "install_dependency"]
        );
    }

    #[tokio::test]
    async fn feeds_observations_back_to_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = ScriptedAdapter::new(vec![
            Ok(call("c1", "list_tools", json!({}))),
            Ok(call("c2", "dynamic_tool", json!({"tool_name": "ghost"}))),
            Ok(InferenceChunk::new("nothing registered", true)),
        ]);
        let observer = CollectingObserver::new();
        let agent = AgentLoop::new(adapter.clone(), engine(dir.path()).await)
            .with_observer(observer.clone());

        let outcome = agent.run("what tools exist?").await.unwrap();
        assert_eq!(outcome.steps(), 3);

        let requests = adapter.requests.lock().unwrap();
        let last = requests.last().unwrap().messages();
        assert_eq!(last[1].tool_calls()[0].name, "list_tools");
        assert_eq!(last[2].role(), MessageRole::Tool);
        assert_eq!(last[2].tool_call_id(), Some("c1"));
        assert_eq!(last[2].content(), "[]");
        assert_eq!(
            last[4].content(),
            "Error: unknown tool 'ghost'. Known tools: none"
        );

        let completed: Vec<_> = observer
            .drain()
            .into_iter()
            .filter(|event| matches!(event, TurnEvent::OperationCompleted { .. }))
            .collect();
        assert_eq!(completed.len(), 2);
    }

    #[tokio::test]
    async fn unknown_operations_become_observations() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = ScriptedAdapter::new(vec![
            Ok(call("c1", "delete_everything", json!({}))),
            Ok(InferenceChunk::new("ok", true)),
        ]);
        let agent = AgentLoop::new(adapter.clone(), engine(dir.path()).await);

        agent.run("go").await.unwrap();

        let requests = adapter.requests.lock().unwrap();
        let observation = requests[1].messages()[2].content().to_owned();
        assert_eq!(observation, "Error: unknown operation `delete_everything`");
    }

    #[tokio::test]
    async fn missing_entrypoint_aborts_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = ScriptedAdapter::new(vec![Ok(call(
            "c1",
            "create_tool",
            json!({
                "tool_name": "echo",
                "code": "def other(): pass",
                "entrypoint": "run_echo",
                "description": "echo"
            }),
        ))]);
        let agent = AgentLoop::new(adapter, engine(dir.path()).await);

        let err = agent.run("make echo").await.expect_err("fatal");
        assert!(matches!(
            err,
            KernelError::Tool { ref operation, .. } if operation == "create_tool"
        ));
    }

    #[tokio::test]
    async fn step_limit_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let replies = (0..5)
            .map(|i| Ok(call(&format!("c{i}"), "list_tools", json!({}))))
            .collect();
        let adapter = ScriptedAdapter::new(replies);
        let agent = AgentLoop::new(adapter.clone(), engine(dir.path()).await)
            .with_config(LoopConfig::default().with_max_steps(3));

        let err = agent.run("loop forever").await.expect_err("limit");
        assert!(matches!(err, KernelError::StepLimitExceeded { limit: 3 }));
        assert_eq!(adapter.requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn adapter_failures_abort_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = ScriptedAdapter::new(vec![Err(AdapterError::transport("connection reset"))]);
        let agent = AgentLoop::new(adapter, engine(dir.path()).await);

        let err = agent.run("hi").await.expect_err("transport failure");
        assert!(matches!(err, KernelError::Adapter { provider: "scripted", .. }));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn render_keeps_strings_verbatim() {
        assert_eq!(render(json!("plain")), "plain");
        assert_eq!(render(json!(["a", "b"])), r#"["a","b"]"#);
        assert_eq!(render(json!(3)), "3");
    }
}
