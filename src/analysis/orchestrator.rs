//! Tiered lookup of song analyses.
//!
//! Memory first, then the persistent store, and only then the upstream
//! model. Deduplication, circuit breaking, retries and the per-attempt
//! timeout wrap the upstream leg only.

use super::fallback::placeholder_analysis;
use super::generator::AnalysisGenerator;
use super::models::{AnalysisQuery, AnalysisResult, CachedAnalysis, ShareInfo};
use super::query::{cache_key, validate_query};
use crate::analysis_store::{AnalysisStore, Lookup};
use crate::cache::{CacheStats, ResultCache};
use crate::llm::LlmError;
use crate::resilience::{
    with_retry, CircuitBreaker, CircuitBreakerStats, RequestDeduplicator, RetryPolicy,
    UpstreamError, UpstreamErrorKind,
};
use crate::server::metrics;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// A successfully resolved analysis.
#[derive(Debug, Clone)]
pub struct AnalyzedSong {
    pub result: AnalysisResult,
    /// Whether a cache tier answered without calling the model.
    pub from_cache: bool,
    /// `None` when the analysis could not be persisted.
    pub share: Option<ShareInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The query was rejected before any lookup.
    Validation,
    /// The upstream is known to be down (circuit open).
    Unavailable,
    /// Credentials or request setup are wrong; retrying will not help.
    Configuration,
    Internal,
}

#[derive(Debug, Clone)]
pub enum AnalysisOutcome {
    Success(AnalyzedSong),
    /// A labeled placeholder served after a transient upstream failure.
    Fallback {
        result: AnalysisResult,
        reason: UpstreamErrorKind,
    },
    Failure {
        kind: FailureKind,
        /// Safe to show to end users.
        message: String,
    },
}

impl AnalysisOutcome {
    fn metric_label(&self) -> &'static str {
        match self {
            AnalysisOutcome::Success(song) if song.from_cache => "cache_hit",
            AnalysisOutcome::Success(_) => "fresh",
            AnalysisOutcome::Fallback { .. } => "fallback",
            AnalysisOutcome::Failure {
                kind: FailureKind::Validation,
                ..
            } => "invalid",
            AnalysisOutcome::Failure { .. } => "failure",
        }
    }
}

/// Everything the deduplicated upstream step needs, cheap to move into the
/// deduplicator's task.
#[derive(Clone)]
struct UpstreamPath {
    generator: AnalysisGenerator,
    breaker: Arc<CircuitBreaker>,
    retry_policy: RetryPolicy,
    store: Arc<dyn AnalysisStore>,
    cache: Arc<ResultCache<CachedAnalysis>>,
}

impl UpstreamPath {
    /// Generate, persist and cache a fresh analysis.
    async fn run(&self, key: &str, query: &AnalysisQuery) -> Result<CachedAnalysis, UpstreamError> {
        let result = self
            .breaker
            .execute(|| {
                with_retry(&self.retry_policy, "generate_analysis", |_| {
                    self.attempt(query)
                })
            })
            .await?;

        let fresh = match self.store.store_analysis(&result, None) {
            Ok(record) => {
                info!(
                    "Stored new analysis of {} - {} as {}",
                    query.artist, query.title, record.share_id
                );
                CachedAnalysis {
                    share: Some(record.share_info()),
                    result: record.result,
                }
            }
            Err(failure) => {
                warn!("Could not persist analysis for {}: {}", key, failure);
                metrics::record_store_error("store_analysis");
                CachedAnalysis {
                    result,
                    share: None,
                }
            }
        };

        self.cache.insert(key, fresh.clone());
        Ok(fresh)
    }

    /// A single model call bounded by the configured timeout.
    async fn attempt(&self, query: &AnalysisQuery) -> Result<AnalysisResult, UpstreamError> {
        let timeout = self.generator.timeout();
        let started = Instant::now();
        let outcome = match tokio::time::timeout(timeout, self.generator.generate(query)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(LlmError::Timeout)) | Err(_) => Err(UpstreamError::timeout(timeout)),
            Ok(Err(err)) => Err(UpstreamError::from(err)),
        };

        let label = match &outcome {
            Ok(_) => "success",
            Err(err) => err.kind.as_str(),
        };
        metrics::record_upstream_call(label, started.elapsed());
        outcome
    }
}

pub struct AnalysisOrchestrator {
    upstream: UpstreamPath,
    store: Arc<dyn AnalysisStore>,
    cache: Arc<ResultCache<CachedAnalysis>>,
    dedup: RequestDeduplicator<CachedAnalysis, UpstreamError>,
}

impl AnalysisOrchestrator {
    pub fn new(
        generator: AnalysisGenerator,
        store: Arc<dyn AnalysisStore>,
        cache: Arc<ResultCache<CachedAnalysis>>,
        breaker: Arc<CircuitBreaker>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            upstream: UpstreamPath {
                generator,
                breaker,
                retry_policy,
                store: store.clone(),
                cache: cache.clone(),
            },
            store,
            cache,
            dedup: RequestDeduplicator::new(),
        }
    }

    pub async fn analyze(&self, query: &AnalysisQuery) -> AnalysisOutcome {
        let started = Instant::now();
        let outcome = match validate_query(query) {
            Ok(()) => self.resolve(query).await,
            Err(err) => AnalysisOutcome::Failure {
                kind: FailureKind::Validation,
                message: err.to_string(),
            },
        };
        self.cache.record_response_time(started.elapsed());
        metrics::record_analysis_outcome(outcome.metric_label());
        outcome
    }

    async fn resolve(&self, query: &AnalysisQuery) -> AnalysisOutcome {
        let key = cache_key(&query.artist, &query.title);

        if let Some(cached) = self.cache.get(&key) {
            debug!("Memory hit for {}", key);
            metrics::record_cache_lookup("memory", "hit");
            return AnalysisOutcome::Success(AnalyzedSong {
                result: cached.result,
                from_cache: true,
                share: cached.share,
            });
        }
        metrics::record_cache_lookup("memory", "miss");

        match self.store.get_cached_analysis(&query.artist, &query.title) {
            Lookup::Found(record) => {
                debug!("Store hit for {}", key);
                metrics::record_cache_lookup("store", "hit");
                let share = record.share_info();
                self.cache.insert(
                    key,
                    CachedAnalysis {
                        result: record.result.clone(),
                        share: Some(share.clone()),
                    },
                );
                return AnalysisOutcome::Success(AnalyzedSong {
                    result: record.result,
                    from_cache: true,
                    share: Some(share),
                });
            }
            Lookup::NotFound => metrics::record_cache_lookup("store", "miss"),
            Lookup::Failed(failure) => {
                warn!("Store lookup for {} failed, treating as miss: {}", key, failure);
                metrics::record_cache_lookup("store", "error");
                metrics::record_store_error("get_cached_analysis");
            }
        }

        let path = self.upstream.clone();
        let task_key = key.clone();
        let task_query = query.clone();
        let fresh = self
            .dedup
            .dedupe(&key, move || async move { path.run(&task_key, &task_query).await })
            .await;

        match fresh {
            Ok(cached) => AnalysisOutcome::Success(AnalyzedSong {
                result: cached.result,
                from_cache: false,
                share: cached.share,
            }),
            Err(err) => Self::degrade(query, err),
        }
    }

    fn degrade(query: &AnalysisQuery, err: UpstreamError) -> AnalysisOutcome {
        match err.kind {
            kind if kind.is_transient() => {
                warn!(
                    "Serving fallback for {} - {} after {}",
                    query.artist, query.title, err
                );
                AnalysisOutcome::Fallback {
                    result: placeholder_analysis(query),
                    reason: kind,
                }
            }
            UpstreamErrorKind::CircuitOpen => AnalysisOutcome::Failure {
                kind: FailureKind::Unavailable,
                message: "The analysis service is temporarily unavailable. Please try again in a minute."
                    .to_string(),
            },
            UpstreamErrorKind::AuthConfiguration | UpstreamErrorKind::Rejected => {
                error!("Upstream rejected the analysis request: {}", err);
                AnalysisOutcome::Failure {
                    kind: FailureKind::Configuration,
                    message: "The analysis service is misconfigured. Please try again later."
                        .to_string(),
                }
            }
            _ => {
                error!("Analysis failed: {}", err);
                AnalysisOutcome::Failure {
                    kind: FailureKind::Internal,
                    message: "Something went wrong while analyzing this song. Please try again."
                        .to_string(),
                }
            }
        }
    }

    pub fn store(&self) -> &Arc<dyn AnalysisStore> {
        &self.store
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn breaker_stats(&self) -> CircuitBreakerStats {
        self.upstream.breaker.stats()
    }

    pub fn in_flight(&self) -> usize {
        self.dedup.in_flight()
    }

    pub async fn upstream_health(&self) -> Result<(), LlmError> {
        self.upstream.generator.health_check().await
    }

    pub fn model(&self) -> &str {
        self.upstream.generator.model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis_store::{SqliteAnalysisStore, StoreFailure, StoreFailureKind};
    use crate::analysis::models::AnalysisRecord;
    use crate::llm::{
        CompletionOptions, CompletionResponse, FinishReason, LlmProvider, Message,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    const ANSWER: &str = r#"{"overview": "A mock-operatic confession.",
        "themes": ["guilt", "fate"], "deepDive": "Four movements.",
        "culturalContext": "Released in 1975."}"#;

    type Respond = Box<dyn Fn(u32) -> Result<String, LlmError> + Send + Sync>;

    struct ScriptedProvider {
        calls: AtomicU32,
        delay: Duration,
        respond: Respond,
    }

    impl ScriptedProvider {
        fn new(delay: Duration, respond: Respond) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                delay,
                respond,
            })
        }

        fn answering() -> Arc<Self> {
            Self::new(Duration::ZERO, Box::new(|_| Ok(ANSWER.to_string())))
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-model"
        }

        async fn complete(
            &self,
            _messages: &[Message],
            _options: &CompletionOptions,
        ) -> Result<CompletionResponse, LlmError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            (self.respond)(call).map(|content| CompletionResponse {
                message: Message::assistant(content),
                finish_reason: FinishReason::Stop,
                usage: None,
            })
        }

        async fn health_check(&self) -> Result<(), LlmError> {
            Ok(())
        }
    }

    struct FailingStore;

    fn unavailable() -> StoreFailure {
        StoreFailure::new(StoreFailureKind::Unavailable, "database is locked")
    }

    impl AnalysisStore for FailingStore {
        fn get_cached_analysis(&self, _artist: &str, _title: &str) -> Lookup<AnalysisRecord> {
            Lookup::Failed(unavailable())
        }

        fn store_analysis(
            &self,
            _result: &AnalysisResult,
            _share_id: Option<&str>,
        ) -> Result<AnalysisRecord, StoreFailure> {
            Err(unavailable())
        }

        fn get_analysis_by_share_id(&self, _share_id: &str) -> Lookup<AnalysisRecord> {
            Lookup::Failed(unavailable())
        }

        fn cleanup_old_analyses(&self, _days_old: u32, _min: u64) -> Result<usize, StoreFailure> {
            Err(unavailable())
        }

        fn count_analyses(&self) -> Result<usize, StoreFailure> {
            Err(unavailable())
        }
    }

    fn orchestrator_with(
        provider: Arc<ScriptedProvider>,
        store: Arc<dyn AnalysisStore>,
        breaker: CircuitBreaker,
    ) -> AnalysisOrchestrator {
        let options = CompletionOptions {
            timeout: Duration::from_secs(30),
            ..CompletionOptions::default()
        };
        AnalysisOrchestrator::new(
            AnalysisGenerator::new(provider, options),
            store,
            Arc::new(ResultCache::with_capacity(100, Duration::from_secs(3600))),
            Arc::new(breaker),
            RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(100),
                backoff_multiplier: 2.0,
                max_jitter: Duration::ZERO,
            },
        )
    }

    fn orchestrator(provider: Arc<ScriptedProvider>, store: Arc<dyn AnalysisStore>) -> AnalysisOrchestrator {
        orchestrator_with(
            provider,
            store,
            CircuitBreaker::with_limits(5, Duration::from_secs(60)),
        )
    }

    fn sqlite_store() -> Arc<dyn AnalysisStore> {
        Arc::new(SqliteAnalysisStore::in_memory().unwrap())
    }

    fn bohemian() -> AnalysisQuery {
        AnalysisQuery::new("Queen", "Bohemian Rhapsody")
    }

    fn expect_success(outcome: AnalysisOutcome) -> AnalyzedSong {
        match outcome {
            AnalysisOutcome::Success(song) => song,
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn first_analysis_calls_upstream_and_persists() {
        let provider = ScriptedProvider::answering();
        let store = sqlite_store();
        let orchestrator = orchestrator(provider.clone(), store.clone());

        let song = expect_success(orchestrator.analyze(&bohemian()).await);
        assert!(!song.from_cache);
        assert_eq!(song.result.artist, "Queen");
        assert_eq!(song.result.overview, "A mock-operatic confession.");
        let share = song.share.unwrap();
        assert_eq!(share.share_id, "queen-bohemian-rhapsody");
        assert_eq!(share.access_count, 1);
        assert_eq!(provider.calls(), 1);
        assert_eq!(store.count_analyses().unwrap(), 1);
    }

    #[tokio::test]
    async fn repeat_in_same_process_is_a_memory_hit() {
        let provider = ScriptedProvider::answering();
        let store = sqlite_store();
        let orchestrator = orchestrator(provider.clone(), store.clone());

        orchestrator.analyze(&bohemian()).await;
        let song = expect_success(
            orchestrator
                .analyze(&AnalysisQuery::new("queen", "  BOHEMIAN   rhapsody"))
                .await,
        );

        assert!(song.from_cache);
        assert_eq!(provider.calls(), 1);
        // Memory hits never touch the store.
        assert_eq!(song.share.unwrap().access_count, 1);
        assert_eq!(orchestrator.cache_stats().hits, 1);
    }

    #[tokio::test]
    async fn repeat_after_restart_is_a_store_hit() {
        let store = sqlite_store();
        let first_provider = ScriptedProvider::answering();
        orchestrator(first_provider.clone(), store.clone())
            .analyze(&bohemian())
            .await;

        let provider = ScriptedProvider::answering();
        let restarted = orchestrator(provider.clone(), store.clone());
        let song = expect_success(restarted.analyze(&bohemian()).await);

        assert!(song.from_cache);
        assert_eq!(provider.calls(), 0);
        assert_eq!(song.share.unwrap().access_count, 2);
    }

    #[tokio::test]
    async fn stored_record_prevents_upstream_call() {
        let store = sqlite_store();
        store
            .store_analysis(
                &AnalysisResult {
                    song_title: "Bohemian Rhapsody".to_string(),
                    artist: "Queen".to_string(),
                    overview: "stored".to_string(),
                    themes: vec![],
                    deep_dive: "stored".to_string(),
                    cultural_context: "stored".to_string(),
                },
                None,
            )
            .unwrap();

        let provider = ScriptedProvider::answering();
        let orchestrator = orchestrator(provider.clone(), store);
        let song = expect_success(orchestrator.analyze(&bohemian()).await);
        assert_eq!(song.result.overview, "stored");
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_upstream_call() {
        let provider = ScriptedProvider::new(
            Duration::from_millis(500),
            Box::new(|_| Ok(ANSWER.to_string())),
        );
        let orchestrator = Arc::new(orchestrator(provider.clone(), sqlite_store()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let orchestrator = orchestrator.clone();
            handles.push(tokio::spawn(async move {
                orchestrator.analyze(&bohemian()).await
            }));
        }

        let mut share_ids = Vec::new();
        for handle in handles {
            let song = expect_success(handle.await.unwrap());
            share_ids.push(song.share.unwrap().share_id);
        }
        assert_eq!(provider.calls(), 1);
        assert!(share_ids.iter().all(|id| id == "queen-bohemian-rhapsody"));
        assert_eq!(orchestrator.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_caller_still_completes_the_analysis() {
        let provider = ScriptedProvider::new(
            Duration::from_millis(500),
            Box::new(|_| Ok(ANSWER.to_string())),
        );
        let orchestrator = Arc::new(orchestrator(provider.clone(), sqlite_store()));

        let caller = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.analyze(&bohemian()).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        caller.abort();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(orchestrator.in_flight(), 0);
        let song = expect_success(orchestrator.analyze(&bohemian()).await);
        assert!(song.from_cache);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn store_failure_does_not_fail_the_request() {
        let provider = ScriptedProvider::answering();
        let orchestrator = orchestrator(provider.clone(), Arc::new(FailingStore));

        let song = expect_success(orchestrator.analyze(&bohemian()).await);
        assert!(!song.from_cache);
        assert!(song.share.is_none());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_timeouts_serve_a_fallback() {
        let provider = ScriptedProvider::new(
            Duration::from_secs(3600),
            Box::new(|_| Ok(ANSWER.to_string())),
        );
        let store = sqlite_store();
        let orchestrator = orchestrator(provider.clone(), store.clone());

        match orchestrator.analyze(&bohemian()).await {
            AnalysisOutcome::Fallback { result, reason } => {
                assert_eq!(reason, UpstreamErrorKind::Timeout);
                assert_eq!(result.artist, "Queen");
            }
            other => panic!("expected fallback, got {:?}", other),
        }
        assert_eq!(provider.calls(), 4);
        // Placeholders are never persisted.
        assert_eq!(store.count_analyses().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_recover_within_retries() {
        let provider = ScriptedProvider::new(
            Duration::ZERO,
            Box::new(|call| {
                if call < 3 {
                    Err(LlmError::Api {
                        status: 502,
                        message: "bad gateway".to_string(),
                    })
                } else {
                    Ok(ANSWER.to_string())
                }
            }),
        );
        let orchestrator = orchestrator(provider.clone(), sqlite_store());

        let song = expect_success(orchestrator.analyze(&bohemian()).await);
        assert!(!song.from_cache);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn auth_failure_is_not_retried_and_not_masked() {
        let provider = ScriptedProvider::new(
            Duration::ZERO,
            Box::new(|_| {
                Err(LlmError::Api {
                    status: 401,
                    message: "invalid api key sk-secret".to_string(),
                })
            }),
        );
        let orchestrator = orchestrator(provider.clone(), sqlite_store());

        match orchestrator.analyze(&bohemian()).await {
            AnalysisOutcome::Failure { kind, message } => {
                assert_eq!(kind, FailureKind::Configuration);
                assert!(!message.contains("sk-secret"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn open_circuit_fails_fast() {
        let provider = ScriptedProvider::new(
            Duration::ZERO,
            Box::new(|_| {
                Err(LlmError::Api {
                    status: 400,
                    message: "bad request".to_string(),
                })
            }),
        );
        let orchestrator = orchestrator_with(
            provider.clone(),
            sqlite_store(),
            CircuitBreaker::with_limits(1, Duration::from_secs(60)),
        );

        orchestrator.analyze(&bohemian()).await;
        match orchestrator
            .analyze(&AnalysisQuery::new("Queen", "Innuendo"))
            .await
        {
            AnalysisOutcome::Failure { kind, .. } => assert_eq!(kind, FailureKind::Unavailable),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn invalid_query_never_reaches_any_tier() {
        let provider = ScriptedProvider::answering();
        let orchestrator = orchestrator(provider.clone(), Arc::new(FailingStore));

        match orchestrator
            .analyze(&AnalysisQuery::new("Queen", "<script>x</script>"))
            .await
        {
            AnalysisOutcome::Failure { kind, .. } => assert_eq!(kind, FailureKind::Validation),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(provider.calls(), 0);
        assert_eq!(orchestrator.cache_stats().misses, 0);
    }
}
