//! Remote client contract.

use crate::change::{ChangesPage, Cursor, EntityPage};
use crate::entity::EntityKind;
use crate::error::{RemoteError, RemoteResult};
use crate::id::{ClientRequestId, EntityId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A network client handles communication with the authoritative remote.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, an in-process reference remote, mocks for
/// testing). Every call may fail with any `RemoteError`; timeouts are
/// applied by the caller.
#[async_trait]
pub trait NetworkClient: Send + Sync {
    /// Lists one page of the full remote collection of `kind`.
    async fn list(&self, kind: EntityKind, offset: u64, limit: u32) -> RemoteResult<EntityPage>;

    /// Fetches one entity, `None` if it does not exist remotely.
    async fn get(&self, kind: EntityKind, id: EntityId) -> RemoteResult<Option<Value>>;

    /// Creates an entity without an idempotency key.
    async fn create(&self, kind: EntityKind, id: EntityId, payload: Value) -> RemoteResult<Value>;

    /// Creates an entity; repeated calls with the same key have one effect.
    async fn create_with_idempotency_key(
        &self,
        kind: EntityKind,
        id: EntityId,
        payload: Value,
        key: ClientRequestId,
    ) -> RemoteResult<Value>;

    /// Updates an entity.
    async fn update(
        &self,
        kind: EntityKind,
        id: EntityId,
        payload: Value,
        key: ClientRequestId,
    ) -> RemoteResult<Value>;

    /// Deletes an entity.
    async fn delete(&self, kind: EntityKind, id: EntityId, key: ClientRequestId) -> RemoteResult<()>;

    /// Creates many entities of one kind in a single call.
    ///
    /// Item failures are reported per item; only a failure of the call
    /// itself is returned as `Err`.
    async fn batch_create(
        &self,
        kind: EntityKind,
        items: Vec<BatchCreateItem>,
    ) -> RemoteResult<BatchCreateResponse>;

    /// Returns changes after `since`, at most `limit` of them.
    async fn get_changes(&self, since: Cursor, limit: u32) -> RemoteResult<ChangesPage>;

    /// Returns the newest cursor in the remote history.
    async fn get_latest_cursor(&self) -> RemoteResult<Cursor>;
}

/// One item of a batch create request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCreateItem {
    /// Idempotency key of the originating mutation.
    pub client_request_id: ClientRequestId,
    /// Entity to create.
    pub entity_id: EntityId,
    /// Entity fields.
    pub payload: Value,
}

/// Outcome of one batch item.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItemResult {
    /// Idempotency key echoed back.
    pub client_request_id: ClientRequestId,
    /// Entity the item referred to.
    pub entity_id: EntityId,
    /// Per-item result.
    pub outcome: Result<(), RemoteError>,
}

/// Response to a batch create.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchCreateResponse {
    /// One result per request item, in request order.
    pub results: Vec<BatchItemResult>,
    /// Number of items that succeeded.
    pub succeeded: usize,
    /// Number of items that failed.
    pub failed: usize,
}

impl BatchCreateResponse {
    /// Builds a response, deriving the aggregate counts from `results`.
    pub fn from_results(results: Vec<BatchItemResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.outcome.is_ok()).count();
        let failed = results.len() - succeeded;
        Self {
            results,
            succeeded,
            failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_counts_from_results() {
        let ok = BatchItemResult {
            client_request_id: ClientRequestId::new(),
            entity_id: EntityId::new(),
            outcome: Ok(()),
        };
        let bad = BatchItemResult {
            client_request_id: ClientRequestId::new(),
            entity_id: EntityId::new(),
            outcome: Err(RemoteError::Validation {
                status: 422,
                message: "bad".into(),
            }),
        };

        let response = BatchCreateResponse::from_results(vec![ok.clone(), bad, ok]);
        assert_eq!(response.succeeded, 2);
        assert_eq!(response.failed, 1);
        assert_eq!(response.results.len(), 3);
    }
}
