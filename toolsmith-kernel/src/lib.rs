//! Orchestration loop for self-extending agents.
//!
//! [`AgentLoop`] alternates between the model and the capability engine: each
//! model turn may request operations (list, create, call tools, install
//! dependencies), whose observations are appended to the conversation before
//! the next turn. The run ends when the model answers without requesting any
//! operation.

#![warn(missing_docs, clippy::pedantic)]

mod agent_loop;
mod error;
mod observer;
mod prompt;

pub use agent_loop::{AgentLoop, DEFAULT_MAX_STEPS, DEFAULT_TEMPERATURE, LoopConfig, RunOutcome};
pub use error::{KernelError, KernelResult};
pub use observer::{CollectingObserver, TracingTurnObserver, TurnEvent, TurnObserver};
pub use prompt::SYSTEM_PROMPT;
