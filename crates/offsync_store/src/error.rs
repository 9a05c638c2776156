//! Error types for storage operations.

use offsync_protocol::{ClientRequestId, EntityId, MutationOperation};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Another process holds the store directory.
    #[error("store directory is locked: {0}")]
    Locked(PathBuf),

    /// A mutation for the same entity and operation is already queued.
    #[error("mutation {operation} already pending for entity {entity_id}")]
    DuplicateMutation {
        /// Affected entity.
        entity_id: EntityId,
        /// Queued operation.
        operation: MutationOperation,
    },

    /// No queued mutation carries this key.
    #[error("no pending mutation with request id {0}")]
    MutationNotFound(ClientRequestId),

    /// The environment name cannot be used as a file name.
    #[error("invalid environment name: {0:?}")]
    InvalidEnvironment(String),

    /// The stored document is inconsistent.
    #[error("store corrupted: {0}")]
    Corrupted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_display_names_operation() {
        let err = StoreError::DuplicateMutation {
            entity_id: EntityId::from_bytes([1u8; 16]),
            operation: MutationOperation::Delete,
        };
        assert!(err.to_string().contains("delete"));
    }
}
