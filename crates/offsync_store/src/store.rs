//! Local store trait definitions.

use crate::error::StoreResult;
use offsync_protocol::{
    ClientRequestId, Entity, EntityId, EntityKind, MutationOperation, PendingMutation, SyncStatus,
};
use std::collections::HashSet;

/// A handle onto the local entity cache and mutation queue.
///
/// Handles are cheap and independently owned. Each execution context opens
/// its own through a [`StoreFactory`] and passes records to other contexts
/// by id only.
///
/// # Invariants
///
/// - At most one pending mutation per `(entity_id, operation)`;
///   `insert_mutation` rejects a second with `DuplicateMutation`
/// - `fetch_mutations` returns mutations in insertion order
/// - Writes become durable at `commit`
pub trait LocalStore: Send {
    /// Inserts or modifies the entity `(kind, id)` through `mutate`.
    ///
    /// If no such entity exists a blank one is created first, so the call is
    /// tolerant of absence.
    fn upsert(
        &mut self,
        kind: EntityKind,
        id: EntityId,
        mutate: &mut dyn FnMut(&mut Entity),
    ) -> StoreResult<()>;

    /// Deletes an entity. Returns false if it did not exist.
    fn delete(&mut self, kind: EntityKind, id: EntityId) -> StoreResult<bool>;

    /// Deletes every entity of `kind`. Returns how many were removed.
    fn delete_all(&mut self, kind: EntityKind) -> StoreResult<usize>;

    /// Looks up one entity.
    fn find(&self, kind: EntityKind, id: EntityId) -> StoreResult<Option<Entity>>;

    /// Returns every entity of `kind`.
    fn fetch_all(&self, kind: EntityKind) -> StoreResult<Vec<Entity>>;

    /// Sets the sync status of one entity. Returns false if it did not exist.
    fn set_sync_status(
        &mut self,
        kind: EntityKind,
        id: EntityId,
        status: SyncStatus,
    ) -> StoreResult<bool>;

    /// Appends a mutation to the queue and returns its sequence number.
    fn insert_mutation(&mut self, mutation: PendingMutation) -> StoreResult<u64>;

    /// Returns all queued mutations in insertion order.
    fn fetch_mutations(&self) -> StoreResult<Vec<PendingMutation>>;

    /// Replaces a queued mutation, matched by its request id.
    fn update_mutation(&mut self, mutation: &PendingMutation) -> StoreResult<()>;

    /// Removes a queued mutation. Returns false if it was not queued.
    fn delete_mutation(&mut self, key: ClientRequestId) -> StoreResult<bool>;

    /// Returns true if `(entity_id, operation)` has a queued mutation.
    fn has_pending_for(&self, entity_id: EntityId, operation: MutationOperation)
        -> StoreResult<bool>;

    /// Makes all writes through this handle durable.
    fn commit(&mut self) -> StoreResult<()>;

    /// Replaces an entity wholesale.
    fn insert(&mut self, entity: Entity) -> StoreResult<()> {
        let kind = entity.kind();
        let id = entity.id();
        let mut replacement = Some(entity);
        self.upsert(kind, id, &mut |slot| {
            if let Some(e) = replacement.take() {
                *slot = e;
            }
        })
    }

    /// Marks the given entities synced. Returns how many existed.
    fn mark_synced(&mut self, kind: EntityKind, ids: &[EntityId]) -> StoreResult<usize> {
        let mut marked = 0;
        for id in ids {
            if self.set_sync_status(kind, *id, SyncStatus::Synced)? {
                marked += 1;
            }
        }
        Ok(marked)
    }

    /// Returns the number of queued mutations.
    fn pending_mutation_count(&self) -> StoreResult<usize> {
        Ok(self.fetch_mutations()?.len())
    }

    /// Resolves every stored foreign-key id against the loaded entities.
    ///
    /// Relationships are held as ids, so re-linking is a verification pass:
    /// dangling ids are counted and kept, since the referent may arrive in
    /// a later pull.
    fn relink(&self) -> StoreResult<RelinkReport> {
        let mut known: HashSet<(EntityKind, EntityId)> = HashSet::new();
        for kind in EntityKind::DEPENDENCY_ORDER {
            for entity in self.fetch_all(kind)? {
                known.insert((kind, entity.id()));
            }
        }

        let mut report = RelinkReport::default();
        for kind in EntityKind::DEPENDENCY_ORDER {
            for entity in self.fetch_all(kind)? {
                for link in entity.foreign_keys() {
                    if known.contains(&link) {
                        report.resolved += 1;
                    } else {
                        report.dangling.push((entity.id(), link.0, link.1));
                    }
                }
            }
        }
        Ok(report)
    }
}

/// Produces fresh, independently-owned store handles.
pub trait StoreFactory: Send + Sync {
    /// Handle type.
    type Store: LocalStore;

    /// Opens a new handle.
    fn open(&self) -> StoreResult<Self::Store>;
}

/// Result of [`LocalStore::relink`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelinkReport {
    /// Foreign keys whose target exists locally.
    pub resolved: usize,
    /// `(owner, target kind, target id)` for every unresolved foreign key.
    pub dangling: Vec<(EntityId, EntityKind, EntityId)>,
}
