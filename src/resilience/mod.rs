//! Protections around the upstream model call: error classification,
//! retries with backoff, circuit breaking and in-flight deduplication.

pub mod circuit_breaker;
pub mod dedup;
pub mod error;
pub mod retry_policy;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerStats, CircuitState};
pub use dedup::RequestDeduplicator;
pub use error::{UpstreamError, UpstreamErrorKind};
pub use retry_policy::{with_retry, RetryPolicy};
