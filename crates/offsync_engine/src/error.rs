//! Error types for the sync engine.

use offsync_protocol::RemoteError;
use offsync_store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A remote call failed.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Local storage failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// An entity could not be encoded for the queue.
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// The circuit breaker is open.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Time until the breaker closes.
        retry_after: Duration,
    },
}

impl SyncError {
    /// Returns true if this error stems from rate limiting.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            SyncError::RateLimited { .. } => true,
            SyncError::Remote(e) => e.is_rate_limited(),
            _ => false,
        }
    }
}
