//! Command-line entry point: runs one prompt through the agent loop against an
//! OpenAI-compatible endpoint.
//!
//! Endpoint settings come from the environment (or a `.env` file): `BASE_URL`,
//! `API_KEY`, `MODEL_NAME`, and optionally `CUSTOM_HEADERS`, `TEMPERATURE`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use toolsmith::adapters::openai::{OpenAiAdapter, OpenAiConfig};
use toolsmith::config::AgentConfig;
use toolsmith::kernel::{AgentLoop, LoopConfig};
use toolsmith::tools::{CapabilityEngine, EngineConfig};
use tracing::info;

/// Self-extending agent: the model may install packages, write Python tools,
/// and call them.
///
/// Tools the model writes run with the full privileges of this process.
#[derive(Debug, Parser)]
#[command(name = "toolsmith", version)]
struct Cli {
    /// Directory receiving generated tool sources.
    #[arg(long)]
    tool_dir: Option<PathBuf>,

    /// Python interpreter used to load and run tools.
    #[arg(long)]
    python: Option<PathBuf>,

    /// Maximum number of model turns before the run is abandoned.
    #[arg(long)]
    max_steps: Option<usize>,

    /// Sampling temperature.
    #[arg(long)]
    temperature: Option<f32>,

    /// Tracing filter directive, e.g. `debug` or `toolsmith_tools=trace`.
    #[arg(long)]
    log_filter: Option<String>,

    /// Task handed to the agent.
    #[arg(required = true, num_args = 1..)]
    prompt: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    toolsmith::telemetry::init(cli.log_filter.as_deref())?;

    let mut config = AgentConfig::load().context("loading agent configuration")?;
    if let Some(tool_dir) = cli.tool_dir {
        config = config.with_tool_dir(tool_dir);
    }
    if let Some(python) = cli.python {
        config = config.with_python(python);
    }
    if let Some(max_steps) = cli.max_steps {
        anyhow::ensure!(max_steps > 0, "--max-steps must be at least 1");
        config = config.with_max_steps(max_steps);
    }
    if let Some(temperature) = cli.temperature {
        config = config.with_temperature(temperature);
    }
    info!(?config, "configuration loaded");

    let mut engine_config =
        EngineConfig::new(config.tool_dir()).with_invocation_timeout(config.tool_timeout());
    if let Some(python) = config.python() {
        engine_config = engine_config.with_interpreter(python);
    }
    let engine = CapabilityEngine::python(&engine_config)
        .await
        .with_context(|| format!("preparing {}", config.tool_dir().display()))?;

    let adapter_config = OpenAiConfig::new(config.model())
        .with_base_url(config.base_url())?
        .with_api_key(config.api_key())
        .with_default_temperature(config.temperature())
        .with_headers(config.custom_headers().iter().cloned());
    let adapter = OpenAiAdapter::new(adapter_config)?;

    let agent = AgentLoop::new(Arc::new(adapter), Arc::new(engine)).with_config(
        LoopConfig::default()
            .with_temperature(Some(config.temperature()))
            .with_max_steps(config.max_steps()),
    );

    let outcome = agent.run(cli.prompt.join(" ")).await?;
    info!(run_id = %outcome.run_id(), steps = outcome.steps(), "agent finished");
    println!("{}", outcome.answer());
    Ok(())
}
