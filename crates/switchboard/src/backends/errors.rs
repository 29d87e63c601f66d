//! Normalized backend error taxonomy.
//!
//! Adapters classify remote failures into [`BackendError`] exactly once;
//! the retry executor, circuit breaker and fallback chain all key off the
//! classification predicates here instead of backend-specific shapes.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Invalid or missing credentials. Indicates misconfiguration, not
    /// backend health — never retried, never trips a circuit.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The caller's request was malformed or rejected. Never retried.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The backend throttled us. Retried; the optional delay comes from a
    /// Retry-After header when the backend supplies one.
    #[error("Rate limit exceeded: {details}")]
    RateLimited {
        details: String,
        retry_delay: Option<Duration>,
    },

    /// 5xx-class failure on the backend side.
    #[error("Server error: {0}")]
    ServerError(String),

    /// Transport-level failure: connect refused, reset, DNS, socket timeout.
    #[error("Network error: {0}")]
    Network(String),

    /// Synthetic — emitted by the circuit breaker without calling the
    /// backend.
    #[error("Circuit open for backend '{0}'")]
    CircuitOpen(String),

    /// Synthetic — the request deadline elapsed while this call was in
    /// flight.
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),
}

impl BackendError {
    /// Whether the retry executor may attempt this call again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::ServerError(_) | Self::Network(_)
        )
    }

    /// Whether this failure counts toward a circuit breaker threshold.
    ///
    /// Auth and malformed-request errors are the caller's (or operator's)
    /// fault and say nothing about backend health.
    pub fn counts_toward_breaker(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::ServerError(_) | Self::Network(_) | Self::Timeout(_)
        )
    }

    /// Stable label for traces and status reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "auth",
            Self::InvalidRequest(_) => "invalid_request",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError(_) => "server",
            Self::Network(_) => "network",
            Self::CircuitOpen(_) => "circuit_open",
            Self::Timeout(_) => "timeout",
        }
    }
}

fn is_network_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || (err.status().is_none() && err.is_request())
}

impl From<reqwest::Error> for BackendError {
    fn from(error: reqwest::Error) -> Self {
        if is_network_error(&error) {
            let msg = if error.is_timeout() {
                "request timed out".to_string()
            } else if let Some(url) = error.url() {
                match url.host_str() {
                    Some(host) => format!("could not reach {}: {}", host, error),
                    None => error.to_string(),
                }
            } else {
                error.to_string()
            };
            return BackendError::Network(msg);
        }
        BackendError::ServerError(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_and_invalid_request_are_terminal() {
        let auth = BackendError::Authentication("bad key".into());
        assert!(!auth.is_retryable());
        assert!(!auth.counts_toward_breaker());

        let invalid = BackendError::InvalidRequest("missing field".into());
        assert!(!invalid.is_retryable());
        assert!(!invalid.counts_toward_breaker());
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        let rate = BackendError::RateLimited {
            details: "slow down".into(),
            retry_delay: Some(Duration::from_secs(2)),
        };
        assert!(rate.is_retryable());
        assert!(rate.counts_toward_breaker());

        assert!(BackendError::ServerError("500".into()).is_retryable());
        assert!(BackendError::Network("reset".into()).is_retryable());
    }

    #[test]
    fn test_synthetic_errors_are_not_retryable() {
        assert!(!BackendError::CircuitOpen("b1".into()).is_retryable());
        assert!(!BackendError::Timeout(Duration::from_millis(200)).is_retryable());
        // A deadline timeout still says something about backend health.
        assert!(BackendError::Timeout(Duration::from_millis(200)).counts_toward_breaker());
        assert!(!BackendError::CircuitOpen("b1".into()).counts_toward_breaker());
    }

    #[test]
    fn test_kind_labels_are_stable() {
        assert_eq!(BackendError::Authentication(String::new()).kind(), "auth");
        assert_eq!(
            BackendError::RateLimited {
                details: String::new(),
                retry_delay: None
            }
            .kind(),
            "rate_limited"
        );
        assert_eq!(BackendError::CircuitOpen(String::new()).kind(), "circuit_open");
    }
}
