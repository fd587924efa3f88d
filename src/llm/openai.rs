//! Client for OpenAI-compatible chat completions APIs.
//!
//! Anything exposing `POST {base_url}/chat/completions` and `GET {base_url}/models`
//! works: OpenAI itself, OpenRouter, vLLM, llama.cpp server.

use super::provider::{CompletionOptions, LlmError, LlmProvider};
use super::types::{CompletionResponse, FinishReason, Message, TokenUsage};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::fmt;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

const KEY_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Upstream error bodies are cut to this many characters.
const MAX_ERROR_BODY_CHARS: usize = 300;

/// Where the bearer token comes from.
#[derive(Clone)]
pub enum ApiKeySource {
    None,
    Static(String),
    /// Shell command printing the key, re-run before every request.
    Command(String),
}

impl fmt::Debug for ApiKeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiKeySource::None => f.write_str("None"),
            ApiKeySource::Static(_) => f.write_str("Static(<redacted>)"),
            ApiKeySource::Command(cmd) => f.debug_tuple("Command").field(cmd).finish(),
        }
    }
}

impl ApiKeySource {
    async fn resolve(&self) -> Result<Option<String>, LlmError> {
        match self {
            ApiKeySource::None => Ok(None),
            ApiKeySource::Static(key) => Ok(Some(key.clone())),
            ApiKeySource::Command(cmd) => run_key_command(cmd).await.map(Some),
        }
    }
}

async fn run_key_command(cmd: &str) -> Result<String, LlmError> {
    debug!("Running api_key_command");
    let output = tokio::time::timeout(
        KEY_COMMAND_TIMEOUT,
        Command::new("sh").arg("-c").arg(cmd).output(),
    )
    .await
    .map_err(|_| LlmError::Credentials("api_key_command timed out".to_string()))?
    .map_err(|e| LlmError::Credentials(format!("could not run api_key_command: {}", e)))?;

    if !output.status.success() {
        warn!("api_key_command exited with {}", output.status);
        return Err(LlmError::Credentials(format!(
            "api_key_command exited with {}",
            output.status
        )));
    }

    let key = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if key.is_empty() {
        return Err(LlmError::Credentials(
            "api_key_command printed nothing".to_string(),
        ));
    }
    Ok(key)
}

pub struct OpenAIProvider {
    client: Client,
    base_url: String,
    model: String,
    api_key_source: ApiKeySource,
}

impl OpenAIProvider {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key_source: ApiKeySource,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key_source,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder, LlmError> {
        Ok(match self.api_key_source.resolve().await? {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        })
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, LlmError> {
        let response = self
            .authorized(builder)
            .await?
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await
    }
}

fn transport_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Connection(e.to_string())
    }
}

/// Turns non-2xx responses into [`LlmError`], keeping the status code.
async fn check_status(response: Response) -> Result<Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(LlmError::RateLimited {
            retry_after: retry_after(response.headers()),
        });
    }
    let body = response.text().await.unwrap_or_default();
    Err(LlmError::Api {
        status: status.as_u16(),
        message: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
    })
}

/// `Retry-After` in delta-seconds form; HTTP dates are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    value.trim().parse().ok().map(Duration::from_secs)
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<CompletionResponse, LlmError> {
        let body = wire::ChatRequest::new(&self.model, messages, options);
        debug!("Requesting completion from {} ({} messages)", self.model, messages.len());

        let builder = self
            .client
            .post(self.endpoint("chat/completions"))
            .timeout(options.timeout)
            .json(&body);
        let reply: wire::ChatResponse = self.send(builder).await?.json().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::InvalidResponse(format!("undecodable completion: {}", e))
            }
        })?;

        reply.into_completion()
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let builder = self
            .client
            .get(self.endpoint("models"))
            .timeout(HEALTH_CHECK_TIMEOUT);
        self.send(builder).await.map(|_| ())
    }
}

/// Request and response bodies of the chat completions API.
mod wire {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize)]
    pub(super) struct ChatRequest<'a> {
        model: &'a str,
        messages: Vec<ChatMessage<'a>>,
        temperature: f32,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_tokens: Option<u32>,
    }

    #[derive(Serialize)]
    struct ChatMessage<'a> {
        role: &'static str,
        content: &'a str,
    }

    impl<'a> ChatRequest<'a> {
        pub(super) fn new(
            model: &'a str,
            messages: &'a [Message],
            options: &CompletionOptions,
        ) -> Self {
            Self {
                model,
                messages: messages
                    .iter()
                    .map(|m| ChatMessage {
                        role: m.role.as_str(),
                        content: &m.content,
                    })
                    .collect(),
                temperature: options.temperature,
                max_tokens: options.max_tokens,
            }
        }
    }

    #[derive(Deserialize)]
    pub(super) struct ChatResponse {
        choices: Vec<Choice>,
        usage: Option<Usage>,
    }

    #[derive(Deserialize)]
    struct Choice {
        message: ReplyMessage,
        finish_reason: Option<String>,
    }

    #[derive(Deserialize)]
    struct ReplyMessage {
        content: Option<String>,
    }

    #[derive(Deserialize)]
    struct Usage {
        prompt_tokens: u32,
        completion_tokens: u32,
        total_tokens: u32,
    }

    impl ChatResponse {
        pub(super) fn into_completion(self) -> Result<CompletionResponse, LlmError> {
            let choice = self.choices.into_iter().next().ok_or_else(|| {
                LlmError::InvalidResponse("completion has no choices".to_string())
            })?;
            Ok(CompletionResponse {
                message: Message::assistant(choice.message.content.unwrap_or_default()),
                finish_reason: FinishReason::from_wire(choice.finish_reason.as_deref()),
                usage: self.usage.map(|u| TokenUsage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                    total_tokens: u.total_tokens,
                }),
            })
        }
    }
}
