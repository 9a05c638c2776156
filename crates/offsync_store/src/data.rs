//! In-memory tables shared by every backend.

use crate::error::{StoreError, StoreResult};
use offsync_protocol::{
    ClientRequestId, Entity, EntityId, EntityKind, MutationOperation, PendingMutation, SyncStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Entity tables and the mutation queue.
#[derive(Debug, Default, Clone)]
pub(crate) struct StoreData {
    entities: BTreeMap<EntityKind, BTreeMap<EntityId, Entity>>,
    /// Mutations keyed by insertion sequence.
    mutations: BTreeMap<u64, PendingMutation>,
    next_sequence: u64,
}

impl StoreData {
    pub(crate) fn upsert(
        &mut self,
        kind: EntityKind,
        id: EntityId,
        mutate: &mut dyn FnMut(&mut Entity),
    ) {
        let table = self.entities.entry(kind).or_default();
        let entity = table.entry(id).or_insert_with(|| Entity::empty(kind, id));
        mutate(entity);
    }

    pub(crate) fn delete(&mut self, kind: EntityKind, id: EntityId) -> bool {
        self.entities
            .get_mut(&kind)
            .map(|table| table.remove(&id).is_some())
            .unwrap_or(false)
    }

    pub(crate) fn delete_all(&mut self, kind: EntityKind) -> usize {
        self.entities
            .remove(&kind)
            .map(|table| table.len())
            .unwrap_or(0)
    }

    pub(crate) fn find(&self, kind: EntityKind, id: EntityId) -> Option<Entity> {
        self.entities.get(&kind).and_then(|t| t.get(&id)).cloned()
    }

    pub(crate) fn fetch_all(&self, kind: EntityKind) -> Vec<Entity> {
        self.entities
            .get(&kind)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn set_sync_status(&mut self, kind: EntityKind, id: EntityId, status: SyncStatus) -> bool {
        match self.entities.get_mut(&kind).and_then(|t| t.get_mut(&id)) {
            Some(entity) => {
                entity.set_sync_status(status);
                true
            }
            None => false,
        }
    }

    pub(crate) fn insert_mutation(&mut self, mut mutation: PendingMutation) -> StoreResult<u64> {
        if self.has_pending_for(mutation.entity_id, mutation.operation) {
            return Err(StoreError::DuplicateMutation {
                entity_id: mutation.entity_id,
                operation: mutation.operation,
            });
        }
        self.next_sequence += 1;
        let sequence = self.next_sequence;
        mutation.sequence = sequence;
        self.mutations.insert(sequence, mutation);
        Ok(sequence)
    }

    pub(crate) fn fetch_mutations(&self) -> Vec<PendingMutation> {
        self.mutations.values().cloned().collect()
    }

    pub(crate) fn update_mutation(&mut self, mutation: &PendingMutation) -> StoreResult<()> {
        let slot = self
            .mutations
            .values_mut()
            .find(|m| m.client_request_id == mutation.client_request_id)
            .ok_or(StoreError::MutationNotFound(mutation.client_request_id))?;
        let sequence = slot.sequence;
        *slot = mutation.clone();
        slot.sequence = sequence;
        Ok(())
    }

    pub(crate) fn delete_mutation(&mut self, key: ClientRequestId) -> bool {
        let sequence = self
            .mutations
            .iter()
            .find(|(_, m)| m.client_request_id == key)
            .map(|(seq, _)| *seq);
        match sequence {
            Some(seq) => self.mutations.remove(&seq).is_some(),
            None => false,
        }
    }

    pub(crate) fn has_pending_for(&self, entity_id: EntityId, operation: MutationOperation) -> bool {
        self.mutations
            .values()
            .any(|m| m.entity_id == entity_id && m.operation == operation)
    }

    /// Encodes the tables as a persistable document.
    pub(crate) fn to_document(&self) -> StoreResult<StoreDocument> {
        let mut entities = Vec::new();
        for (kind, table) in &self.entities {
            for entity in table.values() {
                entities.push(StoredEntity {
                    kind: *kind,
                    sync_status: entity.sync_status(),
                    payload: entity.to_payload()?,
                });
            }
        }
        Ok(StoreDocument {
            entities,
            mutations: self.fetch_mutations(),
            next_sequence: self.next_sequence,
        })
    }

    /// Rebuilds the tables from a persisted document.
    pub(crate) fn from_document(doc: StoreDocument) -> StoreResult<Self> {
        let mut data = StoreData {
            next_sequence: doc.next_sequence,
            ..Default::default()
        };
        for stored in doc.entities {
            let id: EntityId = stored
                .payload
                .get("id")
                .cloned()
                .map(serde_json::from_value)
                .transpose()?
                .ok_or_else(|| StoreError::Corrupted("entity without id".into()))?;
            let mut entity = Entity::from_payload(stored.kind, id, &stored.payload)?;
            entity.set_sync_status(stored.sync_status);
            data.entities.entry(stored.kind).or_default().insert(id, entity);
        }
        for mutation in doc.mutations {
            if mutation.sequence > data.next_sequence {
                return Err(StoreError::Corrupted(format!(
                    "mutation sequence {} beyond high-water mark {}",
                    mutation.sequence, data.next_sequence
                )));
            }
            data.mutations.insert(mutation.sequence, mutation);
        }
        Ok(data)
    }
}

/// On-disk form of [`StoreData`].
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct StoreDocument {
    entities: Vec<StoredEntity>,
    mutations: Vec<PendingMutation>,
    next_sequence: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntity {
    kind: EntityKind,
    sync_status: SyncStatus,
    payload: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mutation(id: EntityId, op: MutationOperation) -> PendingMutation {
        PendingMutation::new(EntityKind::Event, op, id, Value::Null, 0)
    }

    #[test]
    fn upsert_creates_then_modifies() {
        let mut data = StoreData::default();
        let id = EntityId::new();

        data.upsert(EntityKind::Category, id, &mut |e| {
            e.apply_payload(&json!({ "name": "Work" })).unwrap();
        });
        data.upsert(EntityKind::Category, id, &mut |e| {
            e.set_sync_status(SyncStatus::Synced);
        });

        let entity = data.find(EntityKind::Category, id).unwrap();
        assert_eq!(entity.sync_status(), SyncStatus::Synced);
        assert_eq!(entity.to_payload().unwrap()["name"], "Work");
    }

    #[test]
    fn duplicate_mutation_rejected() {
        let mut data = StoreData::default();
        let id = EntityId::new();

        data.insert_mutation(mutation(id, MutationOperation::Create)).unwrap();
        let err = data
            .insert_mutation(mutation(id, MutationOperation::Create))
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateMutation { .. }));

        // A different operation on the same entity is allowed
        data.insert_mutation(mutation(id, MutationOperation::Delete)).unwrap();
        assert_eq!(data.fetch_mutations().len(), 2);
    }

    #[test]
    fn mutations_keep_insertion_order() {
        let mut data = StoreData::default();
        let ids: Vec<_> = (0..5).map(|_| EntityId::new()).collect();
        for id in &ids {
            data.insert_mutation(mutation(*id, MutationOperation::Update)).unwrap();
        }
        let fetched: Vec<_> = data.fetch_mutations().iter().map(|m| m.entity_id).collect();
        assert_eq!(fetched, ids);
    }

    #[test]
    fn update_preserves_sequence() {
        let mut data = StoreData::default();
        let id = EntityId::new();
        let seq = data.insert_mutation(mutation(id, MutationOperation::Create)).unwrap();

        let mut stored = data.fetch_mutations().remove(0);
        stored.attempts = 3;
        stored.sequence = 999;
        data.update_mutation(&stored).unwrap();

        let reloaded = data.fetch_mutations().remove(0);
        assert_eq!(reloaded.attempts, 3);
        assert_eq!(reloaded.sequence, seq);
    }

    #[test]
    fn document_roundtrip_keeps_status_and_queue() {
        let mut data = StoreData::default();
        let id = EntityId::new();
        data.upsert(EntityKind::Region, id, &mut |e| {
            e.apply_payload(&json!({ "name": "Harbour", "radius_m": 120.0 }))
                .unwrap();
            e.set_sync_status(SyncStatus::Failed);
        });
        data.insert_mutation(mutation(id, MutationOperation::Update)).unwrap();

        let doc = data.to_document().unwrap();
        let restored = StoreData::from_document(doc).unwrap();

        let entity = restored.find(EntityKind::Region, id).unwrap();
        assert_eq!(entity.sync_status(), SyncStatus::Failed);
        assert_eq!(restored.fetch_mutations().len(), 1);
        assert!(restored.has_pending_for(id, MutationOperation::Update));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn operation() -> impl Strategy<Value = MutationOperation> {
            prop_oneof![
                Just(MutationOperation::Create),
                Just(MutationOperation::Update),
                Just(MutationOperation::Delete),
            ]
        }

        proptest! {
            #[test]
            fn at_most_one_mutation_per_pair(
                writes in prop::collection::vec((0usize..4, operation()), 0..40)
            ) {
                let ids: Vec<_> = (0..4).map(|_| EntityId::new()).collect();
                let mut data = StoreData::default();
                let mut accepted = std::collections::HashSet::new();

                for (slot, op) in writes {
                    let result = data.insert_mutation(mutation(ids[slot], op));
                    prop_assert_eq!(result.is_ok(), accepted.insert((slot, op)));
                }

                prop_assert_eq!(data.fetch_mutations().len(), accepted.len());
            }
        }
    }
}
