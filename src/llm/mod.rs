//! Upstream language model access.
//!
//! Analyses are generated by any OpenAI-compatible chat completions API.
//! The [`LlmProvider`] trait keeps the rest of the crate independent from
//! the concrete backend so tests can script responses.

mod openai;
mod provider;
mod types;

pub use openai::{ApiKeySource, OpenAIProvider};
pub use provider::{CompletionOptions, LlmError, LlmProvider};
pub use types::{CompletionResponse, FinishReason, Message, MessageRole, TokenUsage};
