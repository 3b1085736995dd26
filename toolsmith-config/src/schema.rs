//! Strongly typed agent settings.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Artifact directory used when `TOOLSMITH_TOOL_DIR` is unset.
pub const DEFAULT_TOOL_DIR: &str = "runtime_tools";

/// Sampling temperature used when `TEMPERATURE` is unset.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Step limit used when `TOOLSMITH_MAX_STEPS` is unset.
pub const DEFAULT_MAX_STEPS: usize = 25;

/// Fully resolved agent configuration.
#[derive(Clone, PartialEq)]
pub struct AgentConfig {
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) model: String,
    pub(crate) custom_headers: Vec<(String, String)>,
    pub(crate) temperature: f32,
    pub(crate) tool_dir: PathBuf,
    pub(crate) python: Option<PathBuf>,
    pub(crate) max_steps: usize,
    pub(crate) tool_timeout: Option<Duration>,
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&str> = self
            .custom_headers
            .iter()
            .map(|(name, _)| name.as_str())
            .collect();
        f.debug_struct("AgentConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("custom_headers", &header_names)
            .field("temperature", &self.temperature)
            .field("tool_dir", &self.tool_dir)
            .field("python", &self.python)
            .field("max_steps", &self.max_steps)
            .field("tool_timeout", &self.tool_timeout)
            .finish()
    }
}

impl AgentConfig {
    /// Creates a configuration with the required endpoint settings and
    /// defaults for everything else.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            custom_headers: Vec::new(),
            temperature: DEFAULT_TEMPERATURE,
            tool_dir: PathBuf::from(DEFAULT_TOOL_DIR),
            python: None,
            max_steps: DEFAULT_MAX_STEPS,
            tool_timeout: None,
        }
    }

    /// Returns the chat-completions base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the bearer credential.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Returns the model identifier.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns extra HTTP headers, in declaration order.
    #[must_use]
    pub fn custom_headers(&self) -> &[(String, String)] {
        &self.custom_headers
    }

    /// Returns the sampling temperature.
    #[must_use]
    pub const fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Returns the artifact directory.
    #[must_use]
    pub fn tool_dir(&self) -> &Path {
        &self.tool_dir
    }

    /// Returns the interpreter override, if any.
    #[must_use]
    pub fn python(&self) -> Option<&Path> {
        self.python.as_deref()
    }

    /// Returns the loop step limit.
    #[must_use]
    pub const fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Returns the per-dispatch timeout, if enabled.
    #[must_use]
    pub const fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout
    }

    /// Overrides the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Overrides the artifact directory.
    #[must_use]
    pub fn with_tool_dir(mut self, tool_dir: impl Into<PathBuf>) -> Self {
        self.tool_dir = tool_dir.into();
        self
    }

    /// Overrides the interpreter.
    #[must_use]
    pub fn with_python(mut self, python: impl Into<PathBuf>) -> Self {
        self.python = Some(python.into());
        self
    }

    /// Overrides the step limit.
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Adds an extra HTTP header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.push((name.into(), value.into()));
        self
    }

    /// Enables a per-dispatch timeout.
    #[must_use]
    pub fn with_tool_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.tool_timeout = timeout;
        self
    }
}
