//! Model adapters used by the agent loop.
//!
//! [`traits`] defines the provider-neutral request, response, and
//! function-calling types; [`openai`] implements them against any
//! OpenAI-compatible chat-completions endpoint.

#![warn(missing_docs, clippy::pedantic)]

pub mod openai;
pub mod traits;

mod http_client;
