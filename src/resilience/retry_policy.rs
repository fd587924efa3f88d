//! Retry policy for upstream calls.
//!
//! Implements exponential backoff with jitter. Only the upstream model call
//! goes through here; cache and store lookups fail fast.

use super::error::UpstreamError;
use crate::config::RetrySettings;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    /// Backoff before the first retry.
    pub base_delay: Duration,
    /// Cap for exponential growth (jitter excluded).
    pub max_delay: Duration,
    /// Multiplier applied to backoff after each retry.
    pub backoff_multiplier: f64,
    /// Upper bound of the random delay added to each backoff.
    pub max_jitter: Duration,
}

impl RetryPolicy {
    pub fn new(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_multiplier: 2.0,
            max_jitter: Duration::from_millis(settings.jitter_ms),
        }
    }

    /// Backoff for a given retry attempt (0-based), without jitter.
    ///
    /// `base_delay * multiplier^attempt`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let backoff_ms = self.base_delay.as_millis() as f64 * factor;
        let capped_ms = backoff_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// Delay before retry `attempt`, honoring a provider `Retry-After` hint.
    pub fn delay_for(&self, attempt: u32, error: &UpstreamError) -> Duration {
        let backoff = self.backoff(attempt);
        let base = match error.retry_after {
            Some(hint) => hint.min(self.max_delay).max(backoff),
            None => backoff,
        };
        base + self.jitter()
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }

    /// Whether `error` should be retried after `attempt` retries were used.
    pub fn should_retry(&self, error: &UpstreamError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetrySettings::default())
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the policy's retries are exhausted. The closure receives the attempt index.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, UpstreamError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation = operation_name, attempt, "Succeeded after retries");
                }
                return Ok(value);
            }
            Err(error) => {
                if !policy.should_retry(&error, attempt) {
                    if error.is_retryable() {
                        warn!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            error = %error,
                            "Giving up after exhausting retries"
                        );
                    }
                    return Err(error);
                }

                let delay = policy.delay_for(attempt, &error);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying after failure"
                );
                crate::server::metrics::record_upstream_retry(error.kind.as_str());
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::error::UpstreamErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            max_jitter: Duration::ZERO,
        }
    }

    #[test]
    fn test_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(1000));
        assert_eq!(policy.max_delay, Duration::from_millis(10_000));
        assert_eq!(policy.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_backoff_calculation() {
        let policy = policy(5);
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        // Capped
        assert_eq!(policy.backoff(4), Duration::from_millis(1000));
        assert_eq!(policy.backoff(10), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            max_jitter: Duration::from_millis(50),
            ..policy(3)
        };
        let error = UpstreamError::new(UpstreamErrorKind::Network, "reset");
        for _ in 0..100 {
            let delay = policy.delay_for(1, &error);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(250));
        }
    }

    #[test]
    fn test_retry_after_hint_extends_delay() {
        let policy = policy(3);
        let mut error = UpstreamError::new(UpstreamErrorKind::RateLimited, "slow down");
        error.retry_after = Some(Duration::from_millis(700));
        assert_eq!(policy.delay_for(0, &error), Duration::from_millis(700));

        error.retry_after = Some(Duration::from_secs(3600));
        assert_eq!(policy.delay_for(0, &error), Duration::from_millis(1000));
    }

    #[test]
    fn test_should_retry() {
        let policy = policy(3);
        let retryable = UpstreamError::new(UpstreamErrorKind::ServerError, "502");
        let fatal = UpstreamError::new(UpstreamErrorKind::AuthConfiguration, "401");

        assert!(policy.should_retry(&retryable, 0));
        assert!(policy.should_retry(&retryable, 2));
        assert!(!policy.should_retry(&retryable, 3));
        assert!(!policy.should_retry(&fatal, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_error_is_retried_exactly_max_retries_times() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&policy(3), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(UpstreamError::new(UpstreamErrorKind::Timeout, "slow")) }
        })
        .await;

        assert_eq!(result.unwrap_err().kind, UpstreamErrorKind::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_fails_on_first_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&policy(3), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(UpstreamError::new(UpstreamErrorKind::AuthConfiguration, "401")) }
        })
        .await;

        assert_eq!(result.unwrap_err().kind, UpstreamErrorKind::AuthConfiguration);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures_with_backoff() {
        let start = tokio::time::Instant::now();
        let result = with_retry(&policy(3), "test", |attempt| async move {
            if attempt < 2 {
                Err(UpstreamError::new(UpstreamErrorKind::Network, "reset"))
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        // 100ms + 200ms of virtual backoff
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }
}
