//! Loading [`AgentConfig`] from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::schema::AgentConfig;

/// Chat-completions base URL.
pub const BASE_URL: &str = "BASE_URL";
/// Bearer credential.
pub const API_KEY: &str = "API_KEY";
/// Model identifier.
pub const MODEL_NAME: &str = "MODEL_NAME";
/// JSON object of extra HTTP headers.
pub const CUSTOM_HEADERS: &str = "CUSTOM_HEADERS";
/// Sampling temperature.
pub const TEMPERATURE: &str = "TEMPERATURE";
/// Artifact directory.
pub const TOOL_DIR: &str = "TOOLSMITH_TOOL_DIR";
/// Interpreter path.
pub const PYTHON: &str = "TOOLSMITH_PYTHON";
/// Loop step limit.
pub const MAX_STEPS: &str = "TOOLSMITH_MAX_STEPS";
/// Per-dispatch timeout in seconds.
pub const TOOL_TIMEOUT_SECS: &str = "TOOLSMITH_TOOL_TIMEOUT_SECS";

impl AgentConfig {
    /// Builds the configuration from `lookup`, which returns the value of a
    /// variable or `None` when unset. Blank values count as unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] when `BASE_URL`, `API_KEY`, or
    /// `MODEL_NAME` is absent and [`ConfigError::Invalid`] when a value cannot
    /// be parsed.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |variable: &str| {
            lookup(variable)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };
        let required =
            |variable: &'static str| get(variable).ok_or(ConfigError::Missing { variable });

        let mut config = Self::new(required(BASE_URL)?, required(API_KEY)?, required(MODEL_NAME)?);

        if let Some(raw) = get(CUSTOM_HEADERS) {
            config.custom_headers = parse_headers(&raw)?;
        }
        if let Some(raw) = get(TEMPERATURE) {
            config.temperature = parse(TEMPERATURE, &raw)?;
        }
        if let Some(raw) = get(TOOL_DIR) {
            config.tool_dir = PathBuf::from(raw);
        }
        if let Some(raw) = get(PYTHON) {
            config.python = Some(PathBuf::from(raw));
        }
        if let Some(raw) = get(MAX_STEPS) {
            let steps: usize = parse(MAX_STEPS, &raw)?;
            if steps == 0 {
                return Err(ConfigError::invalid(MAX_STEPS, "must be at least 1"));
            }
            config.max_steps = steps;
        }
        if let Some(raw) = get(TOOL_TIMEOUT_SECS) {
            let seconds: u64 = parse(TOOL_TIMEOUT_SECS, &raw)?;
            config.tool_timeout = (seconds > 0).then(|| Duration::from_secs(seconds));
        }

        Ok(config)
    }

    /// Builds the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// See [`AgentConfig::from_lookup`].
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|variable| env::var(variable).ok())
    }

    /// Merges the nearest `.env` file into the process environment, then
    /// builds the configuration from it. Variables already set take
    /// precedence over the file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DotEnv`] when a `.env` file exists but cannot be
    /// parsed, plus everything [`AgentConfig::from_lookup`] returns.
    pub fn load() -> ConfigResult<Self> {
        match dotenvy::dotenv() {
            Ok(path) => debug!(path = %path.display(), "loaded .env file"),
            Err(err) if err.not_found() => debug!("no .env file found"),
            Err(err) => return Err(err.into()),
        }
        Self::from_env()
    }
}

fn parse<T>(variable: &'static str, raw: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|err: T::Err| ConfigError::invalid(variable, format!("`{raw}`: {err}")))
}

fn parse_headers(raw: &str) -> ConfigResult<Vec<(String, String)>> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| ConfigError::invalid(CUSTOM_HEADERS, err.to_string()))?;
    let Value::Object(map) = value else {
        return Err(ConfigError::invalid(
            CUSTOM_HEADERS,
            "expected a JSON object of header names to values",
        ));
    };

    map.into_iter()
        .map(|(name, value)| match value {
            Value::String(text) => Ok((name, text)),
            Value::Number(_) | Value::Bool(_) => Ok((name, value.to_string())),
            _ => Err(ConfigError::invalid(
                CUSTOM_HEADERS,
                format!("header `{name}` must be a string"),
            )),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        (BASE_URL, "http://localhost:8000/v1"),
        (API_KEY, "sk-test"),
        (MODEL_NAME, "qwen"),
    ];

    #[test]
    fn loads_required_settings_with_defaults() {
        let config = AgentConfig::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.base_url(), "http://localhost:8000/v1");
        assert_eq!(config.api_key(), "sk-test");
        assert_eq!(config.model(), "qwen");
        assert!(config.custom_headers().is_empty());
        assert_eq!(config.max_steps(), 25);
    }

    #[test]
    fn reports_missing_variables() {
        let err = AgentConfig::from_lookup(lookup(&REQUIRED[..2])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { variable: MODEL_NAME }));

        let mut blank = REQUIRED.to_vec();
        blank[1] = (API_KEY, "   ");
        let err = AgentConfig::from_lookup(lookup(&blank)).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { variable: API_KEY }));
    }

    #[test]
    fn parses_optional_settings() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            (CUSTOM_HEADERS, r#"{"X-Org": "acme", "X-Retries": 3}"#),
            (TEMPERATURE, "0.2"),
            (TOOL_DIR, "/tmp/tools"),
            (PYTHON, "/opt/venv/bin/python"),
            (MAX_STEPS, "8"),
            (TOOL_TIMEOUT_SECS, "30"),
        ]);

        let config = AgentConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(
            config.custom_headers(),
            [
                ("X-Org".to_owned(), "acme".to_owned()),
                ("X-Retries".to_owned(), "3".to_owned()),
            ]
        );
        assert!((config.temperature() - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.tool_dir(), std::path::Path::new("/tmp/tools"));
        assert_eq!(
            config.python(),
            Some(std::path::Path::new("/opt/venv/bin/python"))
        );
        assert_eq!(config.max_steps(), 8);
        assert_eq!(config.tool_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn rejects_invalid_values() {
        for (variable, raw) in [
            (TEMPERATURE, "warm"),
            (MAX_STEPS, "0"),
            (CUSTOM_HEADERS, "[1, 2]"),
            (CUSTOM_HEADERS, r#"{"X": {"nested": true}}"#),
        ] {
            let mut vars = REQUIRED.to_vec();
            vars.push((variable, raw));
            let err = AgentConfig::from_lookup(lookup(&vars)).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { variable: v, .. } if v == variable),
                "{variable}={raw} gave {err}"
            );
        }
    }

    #[test]
    fn zero_timeout_disables_it() {
        let mut vars = REQUIRED.to_vec();
        vars.push((TOOL_TIMEOUT_SECS, "0"));
        let config = AgentConfig::from_lookup(lookup(&vars)).unwrap();
        assert!(config.tool_timeout().is_none());
    }
}
