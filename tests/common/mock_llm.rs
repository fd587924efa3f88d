//! Scripted model provider for end-to-end tests

use async_trait::async_trait;
use song_analysis_server::llm::{
    CompletionOptions, CompletionResponse, FinishReason, LlmError, LlmProvider, Message,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::constants::MOCK_ANSWER;

#[derive(Debug, Clone)]
#[allow(dead_code)]
pub enum MockBehavior {
    /// Return `MOCK_ANSWER`
    Answer,
    /// Fail with the given HTTP status
    FailWith(u16),
    /// Return text that is not an analysis
    Garbage,
}

/// Counts calls and answers according to its current behavior
pub struct MockLlm {
    calls: AtomicU32,
    delay: Duration,
    behavior: Mutex<MockBehavior>,
}

#[allow(dead_code)]
impl MockLlm {
    pub fn new(behavior: MockBehavior) -> Self {
        Self::with_delay(behavior, Duration::ZERO)
    }

    pub fn with_delay(behavior: MockBehavior, delay: Duration) -> Self {
        Self {
            calls: AtomicU32::new(0),
            delay,
            behavior: Mutex::new(behavior),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(
        &self,
        _messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let behavior = self.behavior.lock().unwrap().clone();
        let content = match behavior {
            MockBehavior::Answer => MOCK_ANSWER.to_string(),
            MockBehavior::Garbage => "I'd rather not.".to_string(),
            MockBehavior::FailWith(status) => {
                return Err(LlmError::Api {
                    status,
                    message: "mock failure".to_string(),
                })
            }
        };
        Ok(CompletionResponse {
            message: Message::assistant(content),
            finish_reason: FinishReason::Stop,
            usage: None,
        })
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        match self.behavior.lock().unwrap().clone() {
            MockBehavior::FailWith(status) => Err(LlmError::Api {
                status,
                message: "mock failure".to_string(),
            }),
            _ => Ok(()),
        }
    }
}
