//! Self-extending agent runtime facade.
//!
//! Bundles the workspace crates behind feature flags: the capability engine
//! (`tools`), model adapters (`adapters`), the agent loop (`kernel`),
//! configuration (`config`), and tracing setup (`telemetry`). The `cli`
//! feature builds the `toolsmith` binary.
//!
//! Tools created by the model run with the full privileges of the host
//! process.

#![warn(missing_docs, clippy::pedantic)]

/// Re-export shared primitives for convenience.
pub use toolsmith_primitives as primitives;

/// Agent loop (enabled by `kernel` feature).
#[cfg(feature = "kernel")]
pub use toolsmith_kernel as kernel;

/// Model adapters (enabled by `adapters` feature).
#[cfg(feature = "adapters")]
pub use toolsmith_adapters as adapters;

/// Capability registry, synthesis, dispatch, and installation (enabled by
/// `tools` feature).
#[cfg(feature = "tools")]
pub use toolsmith_tools as tools;

/// Tracing setup (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use toolsmith_telemetry as telemetry;

/// Configuration management (enabled by `config` feature).
#[cfg(feature = "config")]
pub use toolsmith_config as config;
