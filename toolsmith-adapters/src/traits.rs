//! Shared model adapter traits and data structures.

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Result alias for adapter calls.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Chunks produced by one [`ModelAdapter::infer`] call.
pub type AdapterStream = Pin<Box<dyn Stream<Item = AdapterResult<InferenceChunk>> + Send>>;

/// Failure talking to a model provider.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Endpoint, credentials, or headers are unusable.
    #[error("adapter not configured: {reason}")]
    Configuration {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// The request cannot be sent as built.
    #[error("invalid inference request: {reason}")]
    InvalidRequest {
        /// Why the request was refused.
        reason: String,
    },

    /// Connection, TLS, timeout, or HTTP status failure.
    #[error("adapter transport error: {reason}")]
    Transport {
        /// Underlying failure.
        reason: String,
    },

    /// HTTP 429 from the provider.
    #[error("adapter rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Delay taken from `Retry-After`, when present.
        retry_after: Option<Duration>,
    },

    /// The body could not be decoded or held no choices.
    #[error("adapter response error: {reason}")]
    Response {
        /// Decoding failure.
        reason: String,
    },
}

impl AdapterError {
    /// Builds [`AdapterError::InvalidRequest`].
    #[must_use]
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Builds [`AdapterError::Configuration`].
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Builds [`AdapterError::Transport`].
    #[must_use]
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }
}

/// Provider and model an adapter talks to, used in logs and errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdapterMetadata {
    provider: &'static str,
    model: String,
}

impl AdapterMetadata {
    /// Describes an adapter for `model` served by `provider`.
    #[must_use]
    pub fn new(provider: &'static str, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Returns the provider tag, e.g. `openai`.
    #[must_use]
    pub const fn provider(&self) -> &'static str {
        self.provider
    }

    /// Returns the model identifier sent with each request.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Author of a conversation message.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Instructions ahead of the conversation.
    System,
    /// The person driving the run.
    User,
    /// Model output, possibly carrying tool calls.
    Assistant,
    /// Observation answering a tool call.
    Tool,
}

impl MessageRole {
    /// Wire name used by chat-completions APIs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation the model may call, declared with a JSON schema.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ToolSpec {
    name: String,
    description: String,
    parameters: Value,
}

impl ToolSpec {
    /// Declares an operation with its argument schema.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Returns the operation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the model-facing description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the JSON schema of the arguments.
    #[must_use]
    pub fn parameters(&self) -> &Value {
        &self.parameters
    }
}

/// Structured request from the model to run a declared operation.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ToolCall {
    /// Provider-assigned identifier, echoed back with the result.
    pub id: String,
    /// Name of the requested operation.
    pub name: String,
    /// Decoded arguments.
    pub arguments: Value,
}

impl ToolCall {
    /// Creates a tool call.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// One conversation message, including tool-call links.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PromptMessage {
    role: MessageRole,
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl PromptMessage {
    /// Creates a plain text message.
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Creates an assistant message that requested the supplied tool calls.
    #[must_use]
    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(MessageRole::Assistant, content)
        }
    }

    /// Creates a tool message answering the call identified by `call_id`.
    #[must_use]
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(MessageRole::Tool, content)
        }
    }

    /// Returns the message role.
    #[must_use]
    pub const fn role(&self) -> MessageRole {
        self.role
    }

    /// Returns the message content.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns the tool calls carried by an assistant message.
    #[must_use]
    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    /// Returns the call a tool message answers.
    #[must_use]
    pub fn tool_call_id(&self) -> Option<&str> {
        self.tool_call_id.as_deref()
    }
}

/// One model turn: the conversation so far plus sampling settings and the
/// operations the model may call.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct InferenceRequest {
    /// Chat-completions adapters prepend this as a `system` message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    system_prompt: Option<String>,
    messages: Vec<PromptMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSpec>,
}

impl InferenceRequest {
    /// Wraps a conversation.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::InvalidRequest`] for an empty conversation.
    pub fn new(messages: Vec<PromptMessage>) -> AdapterResult<Self> {
        if messages.is_empty() {
            return Err(AdapterError::invalid_request(
                "conversation must hold at least one message",
            ));
        }

        Ok(Self {
            system_prompt: None,
            messages,
            max_output_tokens: None,
            temperature: None,
            tools: Vec::new(),
        })
    }

    /// Sets the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Caps generated tokens for the turn.
    #[must_use]
    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Declares the operations the model may call.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    /// Returns the system prompt, if any.
    #[must_use]
    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Returns the conversation.
    #[must_use]
    pub fn messages(&self) -> &[PromptMessage] {
        &self.messages
    }

    /// Returns the output token cap, if any.
    #[must_use]
    pub const fn max_output_tokens(&self) -> Option<u32> {
        self.max_output_tokens
    }

    /// Returns the sampling temperature, if any.
    #[must_use]
    pub const fn temperature(&self) -> Option<f32> {
        self.temperature
    }

    /// Returns the declared operations.
    #[must_use]
    pub fn tools(&self) -> &[ToolSpec] {
        &self.tools
    }
}

/// Piece of a model reply. Text arrives in `delta`; tool calls usually ride
/// on the final chunk.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct InferenceChunk {
    /// Text appended to the reply.
    pub delta: String,
    /// Set on the last chunk of the reply.
    pub done: bool,
    /// Operations the model requested.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl InferenceChunk {
    /// Creates a text chunk.
    #[must_use]
    pub fn new(delta: impl Into<String>, done: bool) -> Self {
        Self {
            delta: delta.into(),
            done,
            tool_calls: Vec::new(),
        }
    }

    /// Attaches tool calls to the chunk.
    #[must_use]
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }
}

/// Chat model backend driven by the agent loop.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Identifies the provider and model.
    fn metadata(&self) -> &AdapterMetadata;

    /// Sends one turn and streams the reply.
    async fn infer(&self, request: InferenceRequest) -> AdapterResult<AdapterStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn empty_conversation_is_rejected() {
        let err = InferenceRequest::new(Vec::new()).expect_err("messages required");
        assert!(matches!(err, AdapterError::InvalidRequest { .. }));
    }

    #[test]
    fn builds_request() {
        let spec = ToolSpec::new("list_tools", "List tools.", json!({"type": "object"}));
        let request = InferenceRequest::new(vec![PromptMessage::new(MessageRole::User, "ping")])
            .unwrap()
            .with_max_output_tokens(256)
            .with_temperature(0.7)
            .with_tools(vec![spec.clone()]);

        assert_eq!(request.messages().len(), 1);
        assert_eq!(request.max_output_tokens(), Some(256));
        assert_eq!(request.temperature(), Some(0.7));
        assert_eq!(request.tools(), &[spec]);
    }

    #[test]
    fn tool_messages_carry_call_links() {
        let call = ToolCall::new("call_1", "list_tools", json!({}));
        let assistant = PromptMessage::assistant_tool_calls("", vec![call.clone()]);
        assert_eq!(assistant.role(), MessageRole::Assistant);
        assert_eq!(assistant.tool_calls(), &[call]);

        let result = PromptMessage::tool_result("call_1", "[]");
        assert_eq!(result.role(), MessageRole::Tool);
        assert_eq!(result.tool_call_id(), Some("call_1"));
        assert!(result.tool_calls().is_empty());
    }
}
