//! Request handlers over the remote's authoritative state.

use crate::changelog::ChangeLog;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use offsync_protocol::{
    ChangeOperation, ChangesPage, ClientRequestId, Cursor, EntityId, EntityKind, EntityPage,
};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};

/// Authoritative collections, change log and idempotency ledger.
///
/// Handlers are synchronous and run under the server's lock.
#[derive(Debug, Default)]
pub(crate) struct RemoteState {
    collections: BTreeMap<EntityKind, BTreeMap<EntityId, Value>>,
    log: ChangeLog,
    /// Response recorded for every idempotency key that took effect.
    ledger: HashMap<ClientRequestId, Value>,
    /// Number of times each id was actually inserted.
    create_effects: HashMap<EntityId, u32>,
}

impl RemoteState {
    pub(crate) fn log(&self) -> &ChangeLog {
        &self.log
    }

    pub(crate) fn entity(&self, kind: EntityKind, id: EntityId) -> Option<Value> {
        self.collections.get(&kind).and_then(|c| c.get(&id)).cloned()
    }

    pub(crate) fn count(&self, kind: EntityKind) -> usize {
        self.collections.get(&kind).map(BTreeMap::len).unwrap_or(0)
    }

    pub(crate) fn create_effects(&self, id: EntityId) -> u32 {
        self.create_effects.get(&id).copied().unwrap_or(0)
    }

    /// Handles a list request.
    pub(crate) fn handle_list(
        &self,
        config: &ServerConfig,
        kind: EntityKind,
        offset: u64,
        limit: u32,
    ) -> ServerResult<EntityPage> {
        if limit == 0 {
            return Err(ServerError::InvalidRequest("limit must be positive".into()));
        }
        let limit = limit.min(config.max_page_size) as usize;
        let offset = usize::try_from(offset)
            .map_err(|_| ServerError::InvalidRequest("offset out of range".into()))?;

        let Some(collection) = self.collections.get(&kind) else {
            return Ok(EntityPage::default());
        };
        let items: Vec<_> = collection
            .iter()
            .skip(offset)
            .take(limit)
            .map(|(id, v)| (*id, v.clone()))
            .collect();
        let consumed = offset + items.len();
        let next_offset = (consumed < collection.len()).then_some(consumed as u64);
        Ok(EntityPage { items, next_offset })
    }

    /// Handles a change-feed request.
    pub(crate) fn handle_changes(
        &self,
        config: &ServerConfig,
        since: Cursor,
        limit: u32,
    ) -> ServerResult<ChangesPage> {
        if limit == 0 {
            return Err(ServerError::InvalidRequest("limit must be positive".into()));
        }
        Ok(self.log.page_since(since, limit.min(config.max_page_size)))
    }

    /// Handles a create request.
    ///
    /// A key already in the ledger replays its recorded response without a
    /// second effect. Otherwise an existing id is a conflict.
    pub(crate) fn handle_create(
        &mut self,
        kind: EntityKind,
        id: EntityId,
        payload: Value,
        key: Option<ClientRequestId>,
    ) -> ServerResult<Value> {
        if let Some(recorded) = key.and_then(|k| self.ledger.get(&k)) {
            trace!(%id, "replayed create");
            return Ok(recorded.clone());
        }
        let collection = self.collections.entry(kind).or_default();
        if collection.contains_key(&id) {
            return Err(ServerError::AlreadyExists { kind, id });
        }

        let stored = normalize(id, payload)?;
        collection.insert(id, stored.clone());
        *self.create_effects.entry(id).or_default() += 1;
        let sequence = self
            .log
            .append(ChangeOperation::Create, kind, id, stored.clone());
        if let Some(key) = key {
            self.ledger.insert(key, stored.clone());
        }
        debug!(%kind, %id, sequence, "created");
        Ok(stored)
    }

    /// Handles an update request. Fields in `payload` overwrite stored ones.
    pub(crate) fn handle_update(
        &mut self,
        kind: EntityKind,
        id: EntityId,
        payload: Value,
        key: ClientRequestId,
    ) -> ServerResult<Value> {
        if let Some(recorded) = self.ledger.get(&key) {
            return Ok(recorded.clone());
        }
        let current = self
            .collections
            .get_mut(&kind)
            .and_then(|c| c.get_mut(&id))
            .ok_or(ServerError::NotFound { kind, id })?;

        let patch = normalize(id, payload)?;
        if let (Value::Object(fields), Value::Object(patch)) = (&mut *current, patch) {
            fields.extend(patch);
        }
        let stored = current.clone();
        let sequence = self
            .log
            .append(ChangeOperation::Update, kind, id, stored.clone());
        self.ledger.insert(key, stored.clone());
        debug!(%kind, %id, sequence, "updated");
        Ok(stored)
    }

    /// Handles a delete request.
    pub(crate) fn handle_delete(
        &mut self,
        kind: EntityKind,
        id: EntityId,
        key: ClientRequestId,
    ) -> ServerResult<()> {
        if self.ledger.contains_key(&key) {
            return Ok(());
        }
        let removed = self
            .collections
            .get_mut(&kind)
            .and_then(|c| c.remove(&id))
            .is_some();
        if !removed {
            return Err(ServerError::NotFound { kind, id });
        }
        let sequence = self.log.append(ChangeOperation::Delete, kind, id, Value::Null);
        self.ledger.insert(key, Value::Null);
        debug!(%kind, %id, sequence, "deleted");
        Ok(())
    }

    /// Applies a change originating from another client, bypassing the
    /// ledger. Creates and updates upsert; deletes are logged even if the
    /// entity is absent.
    pub(crate) fn apply_foreign(
        &mut self,
        operation: ChangeOperation,
        kind: EntityKind,
        id: EntityId,
        payload: Value,
    ) -> ServerResult<Cursor> {
        let collection = self.collections.entry(kind).or_default();
        let logged = match operation {
            ChangeOperation::Create | ChangeOperation::Update => {
                let patch = normalize(id, payload)?;
                let slot = collection
                    .entry(id)
                    .or_insert_with(|| Value::Object(Map::new()));
                if let (Value::Object(fields), Value::Object(patch)) = (&mut *slot, patch) {
                    fields.extend(patch);
                }
                slot.clone()
            }
            ChangeOperation::Delete => {
                collection.remove(&id);
                Value::Null
            }
        };
        Ok(self.log.append(operation, kind, id, logged))
    }
}

/// Ensures the payload is an object carrying `id`.
fn normalize(id: EntityId, payload: Value) -> ServerResult<Value> {
    let mut fields = match payload {
        Value::Object(fields) => fields,
        Value::Null => Map::new(),
        other => {
            return Err(ServerError::InvalidRequest(format!(
                "payload must be an object, got {other}"
            )))
        }
    };
    fields.insert("id".into(), Value::String(id.to_string()));
    Ok(Value::Object(fields))
}
