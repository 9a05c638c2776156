//! In-memory store for testing.

use crate::data::StoreData;
use crate::error::StoreResult;
use crate::store::{LocalStore, StoreFactory};
use offsync_protocol::{
    ClientRequestId, Entity, EntityId, EntityKind, MutationOperation, PendingMutation, SyncStatus,
};
use parking_lot::RwLock;
use std::sync::Arc;

/// Factory for handles onto one shared in-memory store.
///
/// This backend keeps everything in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral caches that don't need persistence
///
/// Cloning the factory shares the underlying tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStoreFactory {
    data: Arc<RwLock<StoreData>>,
}

impl MemoryStoreFactory {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoreFactory for MemoryStoreFactory {
    type Store = MemoryStore;

    fn open(&self) -> StoreResult<MemoryStore> {
        Ok(MemoryStore {
            data: Arc::clone(&self.data),
        })
    }
}

/// A handle onto a [`MemoryStoreFactory`]'s tables.
///
/// Writes are visible to other handles immediately; `commit` is a no-op.
#[derive(Debug)]
pub struct MemoryStore {
    data: Arc<RwLock<StoreData>>,
}

impl LocalStore for MemoryStore {
    fn upsert(
        &mut self,
        kind: EntityKind,
        id: EntityId,
        mutate: &mut dyn FnMut(&mut Entity),
    ) -> StoreResult<()> {
        self.data.write().upsert(kind, id, mutate);
        Ok(())
    }

    fn delete(&mut self, kind: EntityKind, id: EntityId) -> StoreResult<bool> {
        Ok(self.data.write().delete(kind, id))
    }

    fn delete_all(&mut self, kind: EntityKind) -> StoreResult<usize> {
        Ok(self.data.write().delete_all(kind))
    }

    fn find(&self, kind: EntityKind, id: EntityId) -> StoreResult<Option<Entity>> {
        Ok(self.data.read().find(kind, id))
    }

    fn fetch_all(&self, kind: EntityKind) -> StoreResult<Vec<Entity>> {
        Ok(self.data.read().fetch_all(kind))
    }

    fn set_sync_status(
        &mut self,
        kind: EntityKind,
        id: EntityId,
        status: SyncStatus,
    ) -> StoreResult<bool> {
        Ok(self.data.write().set_sync_status(kind, id, status))
    }

    fn insert_mutation(&mut self, mutation: PendingMutation) -> StoreResult<u64> {
        self.data.write().insert_mutation(mutation)
    }

    fn fetch_mutations(&self) -> StoreResult<Vec<PendingMutation>> {
        Ok(self.data.read().fetch_mutations())
    }

    fn update_mutation(&mut self, mutation: &PendingMutation) -> StoreResult<()> {
        self.data.write().update_mutation(mutation)
    }

    fn delete_mutation(&mut self, key: ClientRequestId) -> StoreResult<bool> {
        Ok(self.data.write().delete_mutation(key))
    }

    fn has_pending_for(
        &self,
        entity_id: EntityId,
        operation: MutationOperation,
    ) -> StoreResult<bool> {
        Ok(self.data.read().has_pending_for(entity_id, operation))
    }

    fn commit(&mut self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_protocol::Event;
    use serde_json::Value;

    #[test]
    fn handles_share_tables() {
        let factory = MemoryStoreFactory::new();
        let mut writer = factory.open().unwrap();
        let reader = factory.open().unwrap();

        let id = EntityId::new();
        writer
            .insert(Entity::Event(Event {
                id,
                title: "Standup".into(),
                ..Default::default()
            }))
            .unwrap();

        assert!(reader.find(EntityKind::Event, id).unwrap().is_some());
    }

    #[test]
    fn mark_synced_counts_existing_only() {
        let factory = MemoryStoreFactory::new();
        let mut store = factory.open().unwrap();
        let present = EntityId::new();
        store.insert(Entity::empty(EntityKind::Event, present)).unwrap();

        let marked = store
            .mark_synced(EntityKind::Event, &[present, EntityId::new()])
            .unwrap();
        assert_eq!(marked, 1);
        assert_eq!(
            store.find(EntityKind::Event, present).unwrap().unwrap().sync_status(),
            SyncStatus::Synced
        );
    }

    #[test]
    fn delete_all_leaves_queue_untouched() {
        let factory = MemoryStoreFactory::new();
        let mut store = factory.open().unwrap();
        let id = EntityId::new();
        store.insert(Entity::empty(EntityKind::Region, id)).unwrap();
        store
            .insert_mutation(PendingMutation::new(
                EntityKind::Region,
                MutationOperation::Create,
                id,
                Value::Null,
                0,
            ))
            .unwrap();

        assert_eq!(store.delete_all(EntityKind::Region).unwrap(), 1);
        assert!(store.fetch_all(EntityKind::Region).unwrap().is_empty());
        assert_eq!(store.pending_mutation_count().unwrap(), 1);
    }

    #[test]
    fn delete_missing_is_false() {
        let factory = MemoryStoreFactory::new();
        let mut store = factory.open().unwrap();
        assert!(!store.delete(EntityKind::Category, EntityId::new()).unwrap());
    }

    #[test]
    fn relink_reports_dangling_keys() {
        let factory = MemoryStoreFactory::new();
        let mut store = factory.open().unwrap();

        let category = EntityId::new();
        let missing_region = EntityId::new();
        store.insert(Entity::empty(EntityKind::Category, category)).unwrap();
        store
            .insert(Entity::Event(Event {
                id: EntityId::new(),
                category_id: Some(category),
                region_id: Some(missing_region),
                ..Default::default()
            }))
            .unwrap();

        let report = store.relink().unwrap();
        assert_eq!(report.resolved, 1);
        assert_eq!(report.dangling.len(), 1);
        assert_eq!(report.dangling[0].1, EntityKind::Region);
        assert_eq!(report.dangling[0].2, missing_region);
    }
}
