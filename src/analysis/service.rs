//! Inbound operations of the analysis layer: analyzing a song for a client
//! and resolving a shared analysis.

use super::generator::AnalysisGenerator;
use super::models::{AnalysisQuery, AnalysisResult, ShareInfo};
use super::orchestrator::{AnalysisOrchestrator, AnalysisOutcome, FailureKind};
use super::query::{parse_query, validate_query, ValidationError};
use super::share_resolver::ShareResolver;
use crate::analysis_store::{AnalysisStore, Lookup};
use crate::cache::{CacheStats, ResultCache};
use crate::config::AppConfig;
use crate::llm::LlmProvider;
use crate::rate_limit::{RateLimitDecision, RateLimiter};
use crate::resilience::{CircuitBreaker, CircuitBreakerStats, RetryPolicy};
use crate::server::metrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Body of an analyze request: free text or explicit fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AnalyzeRequest {
    Structured { artist: String, title: String },
    Text { query: String },
}

impl AnalyzeRequest {
    fn into_query(self) -> Result<AnalysisQuery, ValidationError> {
        match self {
            AnalyzeRequest::Text { query } => parse_query(&query),
            AnalyzeRequest::Structured { artist, title } => {
                let query = AnalysisQuery::new(artist, title);
                validate_query(&query)?;
                Ok(query)
            }
        }
    }
}

/// How the HTTP layer should report a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseStatus {
    #[default]
    Ok,
    BadRequest,
    RateLimited {
        retry_after_secs: u64,
    },
    Unavailable,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    pub remaining: u32,
    pub reset_at: String,
}

impl From<&RateLimitDecision> for RateLimitInfo {
    fn from(decision: &RateLimitDecision) -> Self {
        Self {
            remaining: decision.remaining,
            reset_at: decision.reset_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: String,
}

/// An analysis together with its sharing details, as returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisPayload {
    #[serde(flatten)]
    pub analysis: AnalysisResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_count: Option<u64>,
    pub from_cache: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisPayload>,
    /// Set when `result` is a placeholder served while the upstream is down.
    pub fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub rate_limit_info: RateLimitInfo,
    #[serde(skip)]
    pub status: ResponseStatus,
}

impl AnalysisResponse {
    fn failure(status: ResponseStatus, error: String, rate_limit_info: RateLimitInfo) -> Self {
        Self {
            success: false,
            result: None,
            fallback: false,
            error: Some(error),
            rate_limit_info,
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareMetadata {
    pub share_id: String,
    pub share_url: String,
    pub created_at: String,
    pub access_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SharedAnalysis {
    pub analysis: AnalysisResult,
    pub metadata: ShareMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShareError {
    #[error("This shared analysis could not be found")]
    NotFound,
    #[error("Shared analyses are temporarily unavailable. Please try again later.")]
    Unavailable,
}

/// Snapshot for the cache statistics endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    pub cache: CacheStats,
    pub circuit_breaker: CircuitBreakerStats,
    pub in_flight_requests: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_analyses: Option<usize>,
    pub rate_limited_clients: usize,
}

pub struct AnalysisService {
    orchestrator: AnalysisOrchestrator,
    rate_limiter: RateLimiter,
    share_resolver: ShareResolver,
    base_url: String,
}

impl AnalysisService {
    pub fn new(
        orchestrator: AnalysisOrchestrator,
        rate_limiter: RateLimiter,
        base_url: impl Into<String>,
    ) -> Self {
        let share_resolver = ShareResolver::new(orchestrator.store().clone());
        Self {
            orchestrator,
            rate_limiter,
            share_resolver,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Wires every component from resolved configuration.
    pub fn build(
        config: &AppConfig,
        provider: Arc<dyn LlmProvider>,
        store: Arc<dyn AnalysisStore>,
    ) -> Self {
        let options = crate::llm::CompletionOptions {
            temperature: config.llm.temperature,
            max_tokens: Some(config.llm.max_tokens),
            timeout: std::time::Duration::from_secs(config.llm.timeout_secs),
        };
        let orchestrator = AnalysisOrchestrator::new(
            AnalysisGenerator::new(provider, options),
            store,
            Arc::new(ResultCache::new(&config.cache)),
            Arc::new(CircuitBreaker::new(&config.circuit_breaker)),
            RetryPolicy::new(&config.retry),
        );
        info!(
            "Analysis service ready (model {}, {} requests per {}s per client)",
            orchestrator.model(),
            config.rate_limit.max_requests,
            config.rate_limit.window_secs
        );
        Self::new(
            orchestrator,
            RateLimiter::new(&config.rate_limit),
            config.base_url.clone(),
        )
    }

    /// Analyzes a song for `client_identity`.
    ///
    /// Malformed input is rejected before the rate limiter, so it does not
    /// consume quota. Every admitted request counts, cache hits included.
    pub async fn analyze(&self, request: AnalyzeRequest, client_identity: &str) -> AnalysisResponse {
        let query = match request.into_query() {
            Ok(query) => query,
            Err(err) => return self.reject_invalid(&err.to_string(), client_identity),
        };

        let decision = self.rate_limiter.check(client_identity);
        let rate_limit_info = RateLimitInfo::from(&decision);
        if !decision.allowed {
            debug!("Rate limited {}", client_identity);
            metrics::record_rate_limit_rejection();
            metrics::record_analysis_outcome("rate_limited");
            return AnalysisResponse::failure(
                ResponseStatus::RateLimited {
                    retry_after_secs: decision.retry_after_secs(),
                },
                decision.message(),
                rate_limit_info,
            );
        }

        match self.orchestrator.analyze(&query).await {
            AnalysisOutcome::Success(song) => AnalysisResponse {
                success: true,
                result: Some(self.payload(song.result, song.share, song.from_cache)),
                fallback: false,
                error: None,
                rate_limit_info,
                status: ResponseStatus::Ok,
            },
            AnalysisOutcome::Fallback { result, .. } => AnalysisResponse {
                success: true,
                result: Some(self.payload(result, None, false)),
                fallback: true,
                error: None,
                rate_limit_info,
                status: ResponseStatus::Ok,
            },
            AnalysisOutcome::Failure { kind, message } => {
                let status = match kind {
                    FailureKind::Validation => ResponseStatus::BadRequest,
                    FailureKind::Unavailable => ResponseStatus::Unavailable,
                    FailureKind::Configuration | FailureKind::Internal => ResponseStatus::Internal,
                };
                AnalysisResponse::failure(status, message, rate_limit_info)
            }
        }
    }

    /// A 400 response for input that could not even be parsed as a request.
    pub fn reject_invalid(&self, message: &str, client_identity: &str) -> AnalysisResponse {
        metrics::record_analysis_outcome("invalid");
        let status = self.rate_limiter.get_status(client_identity);
        AnalysisResponse::failure(
            ResponseStatus::BadRequest,
            message.to_string(),
            RateLimitInfo::from(&status),
        )
    }

    pub fn resolve_share(&self, share_id: &str) -> Result<SharedAnalysis, ShareError> {
        match self.share_resolver.resolve(share_id) {
            Lookup::Found(record) => {
                let share = record.share_info();
                Ok(SharedAnalysis {
                    analysis: record.result,
                    metadata: ShareMetadata {
                        share_url: self.share_url(&share.share_id),
                        created_at: share.created_at.to_rfc3339(),
                        access_count: share.access_count,
                        share_id: share.share_id,
                    },
                })
            }
            Lookup::NotFound => Err(ShareError::NotFound),
            Lookup::Failed(_) => Err(ShareError::Unavailable),
        }
    }

    pub fn rate_limit_status(&self, client_identity: &str) -> RateLimitStatus {
        let status = self.rate_limiter.get_status(client_identity);
        RateLimitStatus {
            limit: status.limit,
            remaining: status.remaining,
            reset_at: status.reset_at.to_rfc3339(),
        }
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            cache: self.orchestrator.cache_stats(),
            circuit_breaker: self.orchestrator.breaker_stats(),
            in_flight_requests: self.orchestrator.in_flight(),
            stored_analyses: self.orchestrator.store().count_analyses().ok(),
            rate_limited_clients: self.rate_limiter.tracked_identities(),
        }
    }

    pub fn orchestrator(&self) -> &AnalysisOrchestrator {
        &self.orchestrator
    }

    pub fn share_url(&self, share_id: &str) -> String {
        format!("{}/share/{}", self.base_url, share_id)
    }

    fn payload(
        &self,
        analysis: AnalysisResult,
        share: Option<ShareInfo>,
        from_cache: bool,
    ) -> AnalysisPayload {
        match share {
            Some(share) => AnalysisPayload {
                analysis,
                share_url: Some(self.share_url(&share.share_id)),
                created_at: Some(share.created_at.to_rfc3339()),
                access_count: Some(share.access_count),
                share_id: Some(share.share_id),
                from_cache,
            },
            None => AnalysisPayload {
                analysis,
                share_id: None,
                share_url: None,
                created_at: None,
                access_count: None,
                from_cache,
            },
        }
    }
}
