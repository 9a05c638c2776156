//! The in-process remote.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::faults::{Endpoint, FaultPlan};
use crate::handler::RemoteState;
use async_trait::async_trait;
use offsync_protocol::{
    BatchCreateItem, BatchCreateResponse, BatchItemResult, ChangeOperation, ChangesPage,
    ClientRequestId, Cursor, EntityId, EntityKind, EntityPage, NetworkClient, RemoteError,
    RemoteResult,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

/// An authoritative remote living in the test process.
///
/// Cloning shares the same state, so a test can keep a handle for
/// inspection and fault scripting while the engine owns another.
///
/// # Example
///
/// ```
/// use offsync_server::{Endpoint, InMemoryRemote, ServerConfig};
///
/// let remote = InMemoryRemote::new(ServerConfig::default());
/// remote.faults().rate_limit_next(Endpoint::Write, 3);
/// assert_eq!(remote.change_count(), 0);
/// ```
#[derive(Clone)]
pub struct InMemoryRemote {
    config: Arc<ServerConfig>,
    state: Arc<Mutex<RemoteState>>,
    faults: Arc<FaultPlan>,
}

impl InMemoryRemote {
    /// Creates an empty remote.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(RemoteState::default())),
            faults: Arc::new(FaultPlan::new()),
        }
    }

    /// Returns the fault plan.
    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    /// Returns the stored payload of an entity.
    pub fn entity(&self, kind: EntityKind, id: EntityId) -> Option<Value> {
        self.state.lock().entity(kind, id)
    }

    /// Returns the number of stored entities of `kind`.
    pub fn entity_count(&self, kind: EntityKind) -> usize {
        self.state.lock().count(kind)
    }

    /// Returns how many times `id` was actually inserted.
    ///
    /// Anything above 1 means a retried create was applied twice.
    pub fn create_effects(&self, id: EntityId) -> u32 {
        self.state.lock().create_effects(id)
    }

    /// Returns the number of entries in the change log.
    pub fn change_count(&self) -> usize {
        self.state.lock().log().len()
    }

    /// Records a change made by another client.
    ///
    /// Returns the sequence the change was logged at.
    pub fn seed_foreign_change(
        &self,
        operation: ChangeOperation,
        kind: EntityKind,
        id: EntityId,
        payload: Value,
    ) -> Cursor {
        // Foreign payloads are built by tests; an invalid one is logged as an empty object.
        let mut state = self.state.lock();
        match state.apply_foreign(operation, kind, id, payload) {
            Ok(sequence) => sequence,
            Err(_) => state
                .apply_foreign(operation, kind, id, Value::Null)
                .unwrap_or_default(),
        }
    }

    async fn admit(&self, endpoint: Endpoint) -> RemoteResult<()> {
        let (latency, fault) = self.faults.admit(endpoint);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match fault {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn check_rejected(&self, id: EntityId) -> RemoteResult<()> {
        if self.faults.is_rejected(id) {
            return Err(ServerError::Rejected(id).into());
        }
        Ok(())
    }

    /// Drops the response of an applied write when scripted to.
    fn deliver<T>(&self, result: RemoteResult<T>) -> RemoteResult<T> {
        if result.is_ok() && self.faults.take_lost_response(Endpoint::Write) {
            return Err(RemoteError::Network("connection reset by peer".into()));
        }
        result
    }

    async fn create_inner(
        &self,
        kind: EntityKind,
        id: EntityId,
        payload: Value,
        key: Option<ClientRequestId>,
    ) -> RemoteResult<Value> {
        self.admit(Endpoint::Write).await?;
        self.check_rejected(id)?;
        let result = self
            .state
            .lock()
            .handle_create(kind, id, payload, key)
            .map_err(RemoteError::from);
        self.deliver(result)
    }
}

#[async_trait]
impl NetworkClient for InMemoryRemote {
    async fn list(&self, kind: EntityKind, offset: u64, limit: u32) -> RemoteResult<EntityPage> {
        self.admit(Endpoint::Read).await?;
        Ok(self
            .state
            .lock()
            .handle_list(&self.config, kind, offset, limit)?)
    }

    async fn get(&self, kind: EntityKind, id: EntityId) -> RemoteResult<Option<Value>> {
        self.admit(Endpoint::Read).await?;
        Ok(self.state.lock().entity(kind, id))
    }

    async fn create(&self, kind: EntityKind, id: EntityId, payload: Value) -> RemoteResult<Value> {
        self.create_inner(kind, id, payload, None).await
    }

    async fn create_with_idempotency_key(
        &self,
        kind: EntityKind,
        id: EntityId,
        payload: Value,
        key: ClientRequestId,
    ) -> RemoteResult<Value> {
        self.create_inner(kind, id, payload, Some(key)).await
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: EntityId,
        payload: Value,
        key: ClientRequestId,
    ) -> RemoteResult<Value> {
        self.admit(Endpoint::Write).await?;
        self.check_rejected(id)?;
        let result = self
            .state
            .lock()
            .handle_update(kind, id, payload, key)
            .map_err(RemoteError::from);
        self.deliver(result)
    }

    async fn delete(&self, kind: EntityKind, id: EntityId, key: ClientRequestId) -> RemoteResult<()> {
        self.admit(Endpoint::Write).await?;
        self.check_rejected(id)?;
        let result = self
            .state
            .lock()
            .handle_delete(kind, id, key)
            .map_err(RemoteError::from);
        self.deliver(result)
    }

    async fn batch_create(
        &self,
        kind: EntityKind,
        items: Vec<BatchCreateItem>,
    ) -> RemoteResult<BatchCreateResponse> {
        self.admit(Endpoint::Write).await?;
        if items.len() > self.config.max_batch_size {
            return Err(ServerError::InvalidRequest(format!(
                "batch of {} exceeds limit {}",
                items.len(),
                self.config.max_batch_size
            ))
            .into());
        }
        if !kind.supports_batch_create() {
            return Err(ServerError::InvalidRequest(format!("{kind} does not support batch create")).into());
        }

        let results = {
            let mut state = self.state.lock();
            items
                .into_iter()
                .map(|item| {
                    let outcome = if self.faults.is_rejected(item.entity_id) {
                        Err(ServerError::Rejected(item.entity_id).into())
                    } else {
                        state
                            .handle_create(
                                kind,
                                item.entity_id,
                                item.payload,
                                Some(item.client_request_id),
                            )
                            .map(|_| ())
                            .map_err(RemoteError::from)
                    };
                    BatchItemResult {
                        client_request_id: item.client_request_id,
                        entity_id: item.entity_id,
                        outcome,
                    }
                })
                .collect()
        };
        self.deliver(Ok(BatchCreateResponse::from_results(results)))
    }

    async fn get_changes(&self, since: Cursor, limit: u32) -> RemoteResult<ChangesPage> {
        self.admit(Endpoint::Changes).await?;
        Ok(self
            .state
            .lock()
            .handle_changes(&self.config, since, limit)?)
    }

    async fn get_latest_cursor(&self) -> RemoteResult<Cursor> {
        self.admit(Endpoint::Cursor).await?;
        Ok(self.state.lock().log().latest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(id: EntityId) -> BatchCreateItem {
        BatchCreateItem {
            client_request_id: ClientRequestId::new(),
            entity_id: id,
            payload: json!({ "title": "e" }),
        }
    }

    #[tokio::test]
    async fn lost_response_then_retry_creates_once() {
        let remote = InMemoryRemote::new(ServerConfig::default());
        let id = EntityId::new();
        let key = ClientRequestId::new();
        remote.faults().lose_next_responses(Endpoint::Write, 1);

        let first = remote
            .create_with_idempotency_key(EntityKind::Event, id, json!({}), key)
            .await;
        assert!(matches!(first, Err(RemoteError::Network(_))));

        remote
            .create_with_idempotency_key(EntityKind::Event, id, json!({}), key)
            .await
            .unwrap();
        assert_eq!(remote.create_effects(id), 1);
        assert_eq!(remote.entity_count(EntityKind::Event), 1);
    }

    #[tokio::test]
    async fn batch_reports_per_item() {
        let remote = InMemoryRemote::new(ServerConfig::default());
        let ids: Vec<_> = (0..4).map(|_| EntityId::new()).collect();
        remote.faults().reject_entity(ids[2]);

        let response = remote
            .batch_create(EntityKind::Event, ids.iter().map(|id| item(*id)).collect())
            .await
            .unwrap();

        assert_eq!(response.succeeded, 3);
        assert_eq!(response.failed, 1);
        let failed = &response.results[2];
        assert_eq!(failed.entity_id, ids[2]);
        assert!(matches!(
            failed.outcome,
            Err(RemoteError::Validation { status: 422, .. })
        ));
    }

    #[tokio::test]
    async fn oversized_batch_is_rejected() {
        let remote = InMemoryRemote::new(ServerConfig::default().with_max_batch_size(2));
        let items = (0..3).map(|_| item(EntityId::new())).collect();
        let err = remote.batch_create(EntityKind::Event, items).await.unwrap_err();
        assert!(matches!(err, RemoteError::Validation { status: 400, .. }));
    }

    #[tokio::test]
    async fn changes_follow_writes() {
        let remote = InMemoryRemote::new(ServerConfig::default());
        let id = EntityId::new();
        remote
            .create(EntityKind::Category, id, json!({ "name": "a" }))
            .await
            .unwrap();
        remote
            .delete(EntityKind::Category, id, ClientRequestId::new())
            .await
            .unwrap();

        let page = remote.get_changes(0, 10).await.unwrap();
        let ops: Vec<_> = page.changes.iter().map(|c| c.operation).collect();
        assert_eq!(ops, vec![ChangeOperation::Create, ChangeOperation::Delete]);
        assert_eq!(page.next_cursor, 2);
        assert_eq!(remote.get_latest_cursor().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn rate_limits_apply_before_effect() {
        let remote = InMemoryRemote::new(ServerConfig::default());
        remote.faults().rate_limit_next(Endpoint::Write, 1);
        let id = EntityId::new();
        let err = remote
            .create(EntityKind::Region, id, json!({}))
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
        assert!(remote.entity(EntityKind::Region, id).is_none());
    }

    #[tokio::test]
    async fn foreign_changes_are_visible() {
        let remote = InMemoryRemote::new(ServerConfig::default());
        let id = EntityId::new();
        let seq = remote.seed_foreign_change(
            ChangeOperation::Create,
            EntityKind::Event,
            id,
            json!({ "title": "from phone" }),
        );
        assert_eq!(seq, 1);
        assert_eq!(remote.entity(EntityKind::Event, id).unwrap()["title"], "from phone");
    }
}
