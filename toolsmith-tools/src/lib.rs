//! Dynamic capability engine for self-extending agents.
//!
//! A language model authors source text for new tools at run time; the
//! [`synthesizer`] persists and loads that text through a [`runtime`], the
//! [`registry`] binds the result under a name, the [`dispatcher`] routes
//! invocation requests to it, and the [`installer`] brings in packages the
//! new tools depend on. [`engine::CapabilityEngine`] wires these together and
//! exposes the four operations offered to the model.
//!
//! Capabilities execute with the full privileges of the host process. Nothing
//! in this crate sandboxes them.

#![warn(missing_docs, clippy::pedantic)]

pub mod artifacts;
pub mod catalog;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod installer;
pub mod python;
pub mod registry;
pub mod runtime;
pub mod synthesizer;

pub use engine::{CapabilityEngine, EngineConfig, Operation, OperationSpec};
pub use error::{ToolError, ToolResult};
