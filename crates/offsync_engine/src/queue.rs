//! Durable outbound mutation queue.

use crate::clock::Clock;
use crate::error::SyncResult;
use offsync_protocol::{
    Entity, EntityId, EntityKind, MutationOperation, PendingMutation, RemoteError, SyncStatus,
};
use offsync_store::{LocalStore, StoreError};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened to a mutation after a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Kept for a later pass with `attempts` incremented.
    Retry,
    /// Attempts exhausted; the mutation was dropped and its entity flagged.
    Abandoned,
}

/// Queue operations over a [`LocalStore`] handle.
///
/// The queue itself is stateless; the store owns every record, so any
/// handle from the same factory sees the same queue.
#[derive(Debug, Clone)]
pub struct MutationQueue {
    max_attempts: u32,
    clock: Arc<dyn Clock>,
}

impl MutationQueue {
    /// Creates a queue that abandons mutations after `max_attempts` failures.
    pub fn new(max_attempts: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_attempts,
            clock,
        }
    }

    /// Durably queues a mutation.
    ///
    /// Callers must queue before writing the entity (or use [`stage`]) so a
    /// crash in between never loses the mutation. Returns `None` without
    /// changing the queue if `(entity_id, operation)` is already pending.
    ///
    /// [`stage`]: MutationQueue::stage
    pub fn enqueue<S: LocalStore + ?Sized>(
        &self,
        store: &mut S,
        kind: EntityKind,
        operation: MutationOperation,
        entity_id: EntityId,
        payload: Value,
    ) -> SyncResult<Option<PendingMutation>> {
        let mutation = PendingMutation::new(
            kind,
            operation,
            entity_id,
            payload,
            self.clock.now_millis(),
        );
        match store.insert_mutation(mutation.clone()) {
            Ok(sequence) => {
                store.commit()?;
                debug!(%entity_id, %operation, sequence, "queued mutation");
                Ok(Some(PendingMutation {
                    sequence,
                    ..mutation
                }))
            }
            Err(StoreError::DuplicateMutation { .. }) => {
                warn!(%entity_id, %operation, "mutation already pending, ignoring");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Applies a local change and queues its mutation in one commit.
    ///
    /// Creates and updates write `entity` with status pending; deletes
    /// remove it. If a create or update for the entity is already pending,
    /// its payload absorbs the new fields. A merged update is requeued under
    /// a fresh idempotency key, since the remote may already hold the old
    /// one. Fields for a create that was already attempted go into an
    /// update instead. Returns true if a new mutation was queued.
    pub fn stage<S: LocalStore + ?Sized>(
        &self,
        store: &mut S,
        operation: MutationOperation,
        mut entity: Entity,
    ) -> SyncResult<bool> {
        let kind = entity.kind();
        let id = entity.id();
        let payload = match operation {
            MutationOperation::Delete => Value::Null,
            _ => entity.to_payload()?,
        };

        let queued = if store.has_pending_for(id, operation)? {
            operation != MutationOperation::Delete
                && self.coalesce(store, kind, id, operation, payload)?
        } else {
            let mutation =
                PendingMutation::new(kind, operation, id, payload, self.clock.now_millis());
            store.insert_mutation(mutation)?;
            true
        };

        match operation {
            MutationOperation::Delete => {
                store.delete(kind, id)?;
            }
            _ => {
                entity.set_sync_status(SyncStatus::Pending);
                store.insert(entity)?;
            }
        }
        store.commit()?;
        debug!(%id, %operation, queued, "staged local change");
        Ok(queued)
    }

    fn coalesce<S: LocalStore + ?Sized>(
        &self,
        store: &mut S,
        kind: EntityKind,
        id: EntityId,
        operation: MutationOperation,
        payload: Value,
    ) -> SyncResult<bool> {
        let Some(pending) = store
            .fetch_mutations()?
            .into_iter()
            .find(|m| m.entity_id == id && m.operation == operation)
        else {
            return Ok(false);
        };

        // a sent create may already exist remotely under its key
        if operation == MutationOperation::Create && pending.attempts > 0 {
            let update = MutationOperation::Update;
            if store.has_pending_for(id, update)? {
                return self.coalesce(store, kind, id, update, payload);
            }
            store.insert_mutation(PendingMutation::new(
                kind,
                update,
                id,
                payload,
                self.clock.now_millis(),
            ))?;
            return Ok(true);
        }

        let mut merged = pending.payload.clone();
        match (&mut merged, payload) {
            (Value::Object(current), Value::Object(fields)) => current.extend(fields),
            (slot, fields) => *slot = fields,
        }
        if merged == pending.payload {
            return Ok(false);
        }

        if operation == MutationOperation::Create {
            let mut updated = pending;
            updated.payload = merged;
            store.update_mutation(&updated)?;
        } else {
            let mut fresh = PendingMutation::new(kind, operation, id, merged, pending.created_at);
            fresh.attempts = pending.attempts;
            store.delete_mutation(pending.client_request_id)?;
            store.insert_mutation(fresh)?;
            debug!(%id, "requeued update under a fresh key");
        }
        Ok(false)
    }

    /// Returns all pending mutations in queue order.
    pub fn pending<S: LocalStore + ?Sized>(&self, store: &S) -> SyncResult<Vec<PendingMutation>> {
        Ok(store.fetch_mutations()?)
    }

    /// Returns the ids of all entities with a pending DELETE.
    pub fn pending_delete_ids<S: LocalStore + ?Sized>(
        &self,
        store: &S,
    ) -> SyncResult<BTreeSet<EntityId>> {
        Ok(store
            .fetch_mutations()?
            .into_iter()
            .filter(|m| m.operation == MutationOperation::Delete)
            .map(|m| m.entity_id)
            .collect())
    }

    /// Removes a delivered mutation.
    pub fn complete<S: LocalStore + ?Sized>(
        &self,
        store: &mut S,
        mutation: &PendingMutation,
    ) -> SyncResult<()> {
        store.delete_mutation(mutation.client_request_id)?;
        Ok(())
    }

    /// Records a failed delivery.
    ///
    /// Rate limits never reach here; they are charged to the circuit
    /// breaker instead.
    pub fn record_failure<S: LocalStore + ?Sized>(
        &self,
        store: &mut S,
        mutation: &PendingMutation,
        error: &RemoteError,
    ) -> SyncResult<FailureDisposition> {
        let mut updated = mutation.clone();
        updated.attempts += 1;

        if updated.attempts >= self.max_attempts {
            store.set_sync_status(updated.entity_kind, updated.entity_id, SyncStatus::Failed)?;
            store.delete_mutation(updated.client_request_id)?;
            warn!(
                entity_id = %updated.entity_id,
                operation = %updated.operation,
                attempts = updated.attempts,
                %error,
                "abandoning mutation"
            );
            return Ok(FailureDisposition::Abandoned);
        }

        store.update_mutation(&updated)?;
        debug!(
            entity_id = %updated.entity_id,
            attempts = updated.attempts,
            %error,
            "mutation failed, will retry"
        );
        Ok(FailureDisposition::Retry)
    }
}
