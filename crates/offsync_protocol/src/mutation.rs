//! Pending outbound mutations.

use crate::entity::EntityKind;
use crate::id::{ClientRequestId, EntityId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Type of a queued local write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOperation {
    /// Entity was created locally.
    Create,
    /// Entity was modified locally.
    Update,
    /// Entity was deleted locally.
    Delete,
}

impl fmt::Display for MutationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MutationOperation::Create => "create",
            MutationOperation::Update => "update",
            MutationOperation::Delete => "delete",
        })
    }
}

/// A durable record of a local write awaiting confirmation by the remote.
///
/// # Invariants
///
/// - At most one pending mutation exists per `(entity_id, operation)`
/// - `client_request_id` never changes once assigned; a changed payload
///   is queued as a new record with a new key
/// - `attempts` only grows on failures that are not rate limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    /// Idempotency key sent with every call for this mutation.
    pub client_request_id: ClientRequestId,
    /// Kind of the affected entity.
    pub entity_kind: EntityKind,
    /// Operation performed.
    pub operation: MutationOperation,
    /// Affected entity.
    pub entity_id: EntityId,
    /// Entity fields at the time of the write (`null` for deletes).
    pub payload: Value,
    /// Failed delivery attempts so far.
    pub attempts: u32,
    /// When the mutation was queued, unix millis.
    pub created_at: u64,
    /// Insertion order assigned by the store.
    #[serde(default)]
    pub sequence: u64,
}

impl PendingMutation {
    /// Creates a new mutation with a fresh idempotency key.
    pub fn new(
        entity_kind: EntityKind,
        operation: MutationOperation,
        entity_id: EntityId,
        payload: Value,
        created_at: u64,
    ) -> Self {
        Self {
            client_request_id: ClientRequestId::new(),
            entity_kind,
            operation,
            entity_id,
            payload,
            attempts: 0,
            created_at,
            sequence: 0,
        }
    }

    /// Returns true if this create can travel in a batch call.
    pub fn is_batchable_create(&self) -> bool {
        self.operation == MutationOperation::Create && self.entity_kind.supports_batch_create()
    }
}
