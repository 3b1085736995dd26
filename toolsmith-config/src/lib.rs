//! Configuration management for the agent.
//!
//! Settings come from the process environment, optionally seeded from a
//! `.env` file discovered from the working directory upward. Loading goes
//! through a lookup function so callers (and tests) can supply any source.

#![warn(missing_docs, clippy::pedantic)]

mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use schema::AgentConfig;
