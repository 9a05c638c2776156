//! Errors reported by a remote.

use std::time::Duration;
use thiserror::Error;

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors a `NetworkClient` call can fail with.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// Transport failure or request timeout.
    #[error("network error: {0}")]
    Network(String),

    /// The remote is throttling this client.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Server-provided retry hint, if any.
        retry_after: Option<Duration>,
    },

    /// The entity already exists remotely.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The request was rejected (4xx other than 409/429).
    #[error("validation failed ({status}): {message}")]
    Validation {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// The remote failed (5xx).
    #[error("server error ({status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },
}

impl RemoteError {
    /// Creates a request timeout error.
    pub fn timeout(after: Duration) -> Self {
        Self::Network(format!("request timed out after {after:?}"))
    }

    /// Creates a 404 error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::Validation {
            status: 404,
            message: message.into(),
        }
    }

    /// Returns true for rate-limit responses.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RemoteError::RateLimited { .. })
    }

    /// Returns true for duplicate/already-exists responses.
    pub fn is_conflict(&self) -> bool {
        matches!(self, RemoteError::Conflict(_))
    }

    /// Returns true if the target does not exist remotely.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::Validation { status: 404, .. })
    }

    /// Returns true if this failure spends one of the mutation's attempts.
    ///
    /// Rate limits are governed by the circuit breaker and conflicts are
    /// terminal successes, so neither counts.
    pub fn counts_against_attempts(&self) -> bool {
        matches!(
            self,
            RemoteError::Network(_) | RemoteError::Validation { .. } | RemoteError::Server { .. }
        )
    }

    /// Returns true if the failure is likely to affect every request, not just this one.
    pub fn is_systemic(&self) -> bool {
        matches!(self, RemoteError::Network(_) | RemoteError::Server { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let rate = RemoteError::RateLimited { retry_after: None };
        assert!(rate.is_rate_limited());
        assert!(!rate.counts_against_attempts());

        let conflict = RemoteError::Conflict("exists".into());
        assert!(conflict.is_conflict());
        assert!(!conflict.counts_against_attempts());

        assert!(RemoteError::timeout(Duration::from_secs(30)).counts_against_attempts());
        assert!(RemoteError::not_found("gone").is_not_found());
        assert!(RemoteError::Server {
            status: 503,
            message: "down".into()
        }
        .is_systemic());
        assert!(!RemoteError::Validation {
            status: 422,
            message: "bad".into()
        }
        .is_systemic());
    }

    #[test]
    fn error_display() {
        let err = RemoteError::Validation {
            status: 422,
            message: "title required".into(),
        };
        assert_eq!(err.to_string(), "validation failed (422): title required");
    }
}
