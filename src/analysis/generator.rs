use super::models::{AnalysisQuery, AnalysisResult};
use super::prompt::{build_messages, parse_analysis};
use crate::llm::{CompletionOptions, FinishReason, LlmError, LlmProvider};
use std::sync::Arc;
use tracing::debug;

/// Produces fresh analyses by asking the configured model.
#[derive(Clone)]
pub struct AnalysisGenerator {
    provider: Arc<dyn LlmProvider>,
    options: CompletionOptions,
}

impl AnalysisGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, options: CompletionOptions) -> Self {
        Self { provider, options }
    }

    /// One upstream call, no retries.
    pub async fn generate(&self, query: &AnalysisQuery) -> Result<AnalysisResult, LlmError> {
        let messages = build_messages(query);
        let response = self.provider.complete(&messages, &self.options).await?;

        if let Some(usage) = response.usage {
            debug!(
                "{} used {} tokens for {} - {}",
                self.provider.model(),
                usage.total_tokens,
                query.artist,
                query.title
            );
        }
        match response.finish_reason {
            FinishReason::ContentFilter => {
                return Err(LlmError::InvalidResponse(
                    "response blocked by content filter".to_string(),
                ))
            }
            FinishReason::MaxTokens => debug!("Response hit the token limit, parsing anyway"),
            FinishReason::Stop => {}
        }

        parse_analysis(&response.message.content, query)
    }

    pub async fn health_check(&self) -> Result<(), LlmError> {
        self.provider.health_check().await
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn timeout(&self) -> std::time::Duration {
        self.options.timeout
    }
}
