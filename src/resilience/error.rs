use crate::llm::LlmError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classification of a failed upstream call, attached where the failure happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpstreamErrorKind {
    /// Connection refused, reset, DNS failure.
    Network,
    /// The call did not complete in time.
    Timeout,
    /// The provider answered 429.
    RateLimited,
    /// The provider answered 5xx.
    ServerError,
    /// Missing or rejected credentials (401/403, failing key command).
    AuthConfiguration,
    /// Any other 4xx: the request itself was refused.
    Rejected,
    /// The provider answered but the content was unusable.
    InvalidResponse,
    /// The circuit breaker refused to attempt the call.
    CircuitOpen,
    /// A bug or a panicked task on our side.
    Internal,
}

impl UpstreamErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamErrorKind::Network => "network",
            UpstreamErrorKind::Timeout => "timeout",
            UpstreamErrorKind::RateLimited => "rate_limited",
            UpstreamErrorKind::ServerError => "server_error",
            UpstreamErrorKind::AuthConfiguration => "auth_configuration",
            UpstreamErrorKind::Rejected => "rejected",
            UpstreamErrorKind::InvalidResponse => "invalid_response",
            UpstreamErrorKind::CircuitOpen => "circuit_open",
            UpstreamErrorKind::Internal => "internal",
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpstreamErrorKind::Network
                | UpstreamErrorKind::Timeout
                | UpstreamErrorKind::RateLimited
                | UpstreamErrorKind::ServerError
                | UpstreamErrorKind::InvalidResponse
        )
    }

    /// Whether a placeholder analysis should be served instead of an error.
    pub fn is_transient(&self) -> bool {
        self.is_retryable()
    }
}

impl fmt::Display for UpstreamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error of the upstream analysis path. Cheap to clone so that every
/// deduplicated caller can receive the same failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct UpstreamError {
    pub kind: UpstreamErrorKind,
    pub message: String,
    /// Provider hint on how long to wait before retrying.
    pub retry_after: Option<Duration>,
}

impl UpstreamError {
    pub fn new(kind: UpstreamErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            UpstreamErrorKind::Timeout,
            format!("upstream call timed out after {}s", after.as_secs()),
        )
    }

    pub fn circuit_open() -> Self {
        Self::new(
            UpstreamErrorKind::CircuitOpen,
            "service temporarily unavailable",
        )
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<LlmError> for UpstreamError {
    fn from(err: LlmError) -> Self {
        let kind = match &err {
            LlmError::Connection(_) => UpstreamErrorKind::Network,
            LlmError::Timeout => UpstreamErrorKind::Timeout,
            LlmError::RateLimited { .. } => UpstreamErrorKind::RateLimited,
            LlmError::Api { status, .. } => match *status {
                401 | 403 => UpstreamErrorKind::AuthConfiguration,
                408 => UpstreamErrorKind::Timeout,
                s if s >= 500 => UpstreamErrorKind::ServerError,
                _ => UpstreamErrorKind::Rejected,
            },
            LlmError::Credentials(_) => UpstreamErrorKind::AuthConfiguration,
            LlmError::InvalidResponse(_) => UpstreamErrorKind::InvalidResponse,
        };
        let retry_after = match &err {
            LlmError::RateLimited { retry_after } => *retry_after,
            _ => None,
        };
        Self {
            kind,
            message: err.to_string(),
            retry_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> LlmError {
        LlmError::Api {
            status,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn maps_http_statuses_to_kinds() {
        assert_eq!(UpstreamError::from(api(401)).kind, UpstreamErrorKind::AuthConfiguration);
        assert_eq!(UpstreamError::from(api(403)).kind, UpstreamErrorKind::AuthConfiguration);
        assert_eq!(UpstreamError::from(api(400)).kind, UpstreamErrorKind::Rejected);
        assert_eq!(UpstreamError::from(api(408)).kind, UpstreamErrorKind::Timeout);
        assert_eq!(UpstreamError::from(api(500)).kind, UpstreamErrorKind::ServerError);
        assert_eq!(UpstreamError::from(api(503)).kind, UpstreamErrorKind::ServerError);
    }

    #[test]
    fn rate_limit_keeps_retry_after_hint() {
        let err = UpstreamError::from(LlmError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        });
        assert_eq!(err.kind, UpstreamErrorKind::RateLimited);
        assert_eq!(err.retry_after, Some(Duration::from_secs(7)));
        assert!(err.is_retryable());
    }

    #[test]
    fn retryable_kinds() {
        assert!(UpstreamErrorKind::Network.is_retryable());
        assert!(UpstreamErrorKind::Timeout.is_retryable());
        assert!(UpstreamErrorKind::ServerError.is_retryable());
        assert!(UpstreamErrorKind::InvalidResponse.is_retryable());
        assert!(!UpstreamErrorKind::AuthConfiguration.is_retryable());
        assert!(!UpstreamErrorKind::Rejected.is_retryable());
        assert!(!UpstreamErrorKind::CircuitOpen.is_retryable());
        assert!(!UpstreamErrorKind::Internal.is_retryable());
    }

    #[test]
    fn credentials_failure_is_auth_configuration() {
        let err = UpstreamError::from(LlmError::Credentials("empty key".to_string()));
        assert_eq!(err.kind, UpstreamErrorKind::AuthConfiguration);
        assert!(!err.kind.is_transient());
    }
}
