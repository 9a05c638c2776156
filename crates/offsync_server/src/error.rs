//! Error types for the reference remote.

use offsync_protocol::{EntityId, EntityKind, RemoteError};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors the request handlers produce before they are put on the wire.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServerError {
    /// Malformed or oversized request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Entity does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Requested kind.
        kind: EntityKind,
        /// Requested id.
        id: EntityId,
    },

    /// Entity already exists and the request carried no matching key.
    #[error("{kind} {id} already exists")]
    AlreadyExists {
        /// Requested kind.
        kind: EntityKind,
        /// Requested id.
        id: EntityId,
    },

    /// Entity payload failed validation.
    #[error("entity {0} rejected")]
    Rejected(EntityId),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Internal(_))
    }

    /// Returns the HTTP status this error would be reported with.
    pub fn status(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 400,
            ServerError::NotFound { .. } => 404,
            ServerError::AlreadyExists { .. } => 409,
            ServerError::Rejected(_) => 422,
            ServerError::Internal(_) => 500,
        }
    }
}

impl From<ServerError> for RemoteError {
    fn from(err: ServerError) -> Self {
        let status = err.status();
        match err {
            ServerError::AlreadyExists { .. } => RemoteError::Conflict(err.to_string()),
            ServerError::Internal(message) => RemoteError::Server { status, message },
            other => RemoteError::Validation {
                status,
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::Rejected(EntityId::new()).is_server_error());
    }

    #[test]
    fn maps_to_remote_taxonomy() {
        let id = EntityId::new();
        let kind = EntityKind::Event;

        let remote: RemoteError = ServerError::AlreadyExists { kind, id }.into();
        assert!(remote.is_conflict());

        let remote: RemoteError = ServerError::NotFound { kind, id }.into();
        assert!(remote.is_not_found());

        let remote: RemoteError = ServerError::Internal("disk".into()).into();
        assert_eq!(
            remote,
            RemoteError::Server {
                status: 500,
                message: "disk".into()
            }
        );
    }
}
