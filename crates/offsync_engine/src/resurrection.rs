//! Resurrection prevention.
//!
//! A change-feed entry written before a local delete reached the remote
//! would otherwise recreate an entity the user already removed. Every id
//! with an unconfirmed DELETE is held in a set that pulls consult.

use offsync_protocol::EntityId;
use std::collections::BTreeSet;

/// The resurrection set for one sync pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingDeletes {
    ids: BTreeSet<EntityId>,
    confirmed: BTreeSet<EntityId>,
}

impl PendingDeletes {
    /// Builds the set from the persisted snapshot and the live queue.
    ///
    /// The queue is the source of truth: persisted ids whose DELETE is no
    /// longer queued were flushed in an earlier run whose final save was
    /// lost. They still guard this pass and are cleared when it ends.
    pub fn capture(persisted: &BTreeSet<EntityId>, queued: BTreeSet<EntityId>) -> Self {
        let confirmed = persisted.difference(&queued).copied().collect();
        let mut ids = queued;
        ids.extend(persisted.iter().copied());
        Self { ids, confirmed }
    }

    /// Returns true if changes to `id` must not be applied.
    pub fn contains(&self, id: &EntityId) -> bool {
        self.ids.contains(id)
    }

    /// Marks `id` as flushed; it keeps guarding until the pass ends.
    pub fn confirm(&mut self, id: EntityId) {
        if self.ids.contains(&id) {
            self.confirmed.insert(id);
        }
    }

    /// Returns every guarded id.
    pub fn ids(&self) -> &BTreeSet<EntityId> {
        &self.ids
    }

    /// Returns the number of guarded ids.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if nothing is guarded.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns the ids that must stay guarded after this pass.
    pub fn remaining(&self) -> BTreeSet<EntityId> {
        self.ids.difference(&self.confirmed).copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_unions_sources() {
        let a = EntityId::new();
        let b = EntityId::new();
        let persisted: BTreeSet<_> = [a].into();
        let queued: BTreeSet<_> = [b].into();

        let deletes = PendingDeletes::capture(&persisted, queued);
        assert!(deletes.contains(&a));
        assert!(deletes.contains(&b));
        // a's DELETE is gone from the queue, so it drops out after the pass
        assert_eq!(deletes.remaining(), [b].into());
    }

    #[test]
    fn confirmed_ids_guard_until_pass_ends() {
        let id = EntityId::new();
        let mut deletes = PendingDeletes::capture(&BTreeSet::new(), [id].into());
        deletes.confirm(id);
        assert!(deletes.contains(&id));
        assert!(deletes.remaining().is_empty());
    }

    #[test]
    fn confirming_unknown_id_is_ignored() {
        let mut deletes = PendingDeletes::default();
        deletes.confirm(EntityId::new());
        assert!(deletes.is_empty());
        assert!(deletes.remaining().is_empty());
    }
}
