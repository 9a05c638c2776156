//! Incremental pull: apply the remote change feed since the stored cursor.

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::push::settled_status;
use crate::remote::call;
use crate::resurrection::PendingDeletes;
use offsync_protocol::{ChangeOperation, ChangeRecord, Entity, MutationOperation, NetworkClient};
use offsync_store::{LocalStore, MetadataStore, SyncMetadata};
use tracing::{debug, warn};

/// Counters produced by one pull phase.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct PullSummary {
    pub applied: usize,
    pub skipped_resurrections: usize,
    pub pages: usize,
}

/// Everything one pull phase borrows from the orchestrator.
pub(crate) struct PullPhase<'a, C, S> {
    pub client: &'a C,
    pub store: &'a mut S,
    pub metadata: &'a dyn MetadataStore,
    pub meta: &'a mut SyncMetadata,
    pub deletes: &'a PendingDeletes,
    pub config: &'a SyncConfig,
}

impl<C: NetworkClient, S: LocalStore> PullPhase<'_, C, S> {
    /// Runs the phase.
    ///
    /// Each page is committed and its cursor persisted before the next is
    /// requested, so a failure later in the loop never replays applied
    /// pages. A failed page leaves the cursor where it was.
    pub(crate) async fn run(mut self) -> SyncResult<PullSummary> {
        let mut summary = PullSummary::default();
        loop {
            let since = self.meta.cursor;
            let page = call(
                self.config.request_timeout,
                self.client.get_changes(since, self.config.pull_limit()),
            )
            .await?;

            for change in &page.changes {
                if self.apply(change)? {
                    summary.applied += 1;
                } else {
                    summary.skipped_resurrections += 1;
                }
            }
            self.store.commit()?;
            summary.pages += 1;

            if page.next_cursor > since {
                self.meta.cursor = page.next_cursor;
                self.metadata.save(&self.config.environment, self.meta)?;
            } else if page.next_cursor < since {
                warn!(since, next = page.next_cursor, "remote cursor moved backwards, ignoring");
            }
            debug!(
                cursor = self.meta.cursor,
                changes = page.changes.len(),
                has_more = page.has_more,
                "applied change page"
            );

            if !page.has_more {
                break;
            }
            if page.next_cursor <= since {
                warn!(since, "change feed made no progress, stopping pull");
                break;
            }
        }
        Ok(summary)
    }

    /// Applies one change. Returns false if it was dropped as a resurrection.
    fn apply(&mut self, change: &ChangeRecord) -> SyncResult<bool> {
        let id = change.entity_id;
        if self.deletes.contains(&id)
            || self.store.has_pending_for(id, MutationOperation::Delete)?
        {
            debug!(entity_id = %id, operation = ?change.operation, "dropping change for deleted entity");
            return Ok(false);
        }

        match change.operation {
            ChangeOperation::Delete => {
                if !self.store.delete(change.entity_kind, id)? {
                    debug!(entity_id = %id, "delete for unknown entity");
                }
            }
            ChangeOperation::Create | ChangeOperation::Update => {
                let mut entity = self
                    .store
                    .find(change.entity_kind, id)?
                    .unwrap_or_else(|| Entity::empty(change.entity_kind, id));
                if let Err(e) = entity.apply_payload(&change.payload) {
                    warn!(entity_id = %id, kind = %change.entity_kind, error = %e, "skipping malformed change");
                    return Ok(true);
                }
                entity.set_sync_status(settled_status(&*self.store, id)?);
                self.store.insert(entity)?;
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use offsync_protocol::{EntityId, EntityKind, PendingMutation, RemoteError, SyncStatus};
    use offsync_server::{Endpoint, InMemoryRemote, ServerConfig};
    use offsync_store::{MemoryMetadataStore, MemoryStoreFactory, StoreFactory};
    use serde_json::json;
    use std::collections::BTreeSet;

    fn remote() -> InMemoryRemote {
        InMemoryRemote::new(ServerConfig::default())
    }

    async fn pull(
        remote: &InMemoryRemote,
        store: &mut impl LocalStore,
        metadata: &MemoryMetadataStore,
        meta: &mut SyncMetadata,
        deletes: &PendingDeletes,
    ) -> PullSummary {
        let config = SyncConfig::new("test").with_pull_page_size(2);
        PullPhase {
            client: remote,
            store,
            metadata,
            meta,
            deletes,
            config: &config,
        }
        .run()
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn pages_through_feed_and_persists_cursor() {
        let remote = remote();
        let ids: Vec<_> = (0..5).map(|_| EntityId::new()).collect();
        for (i, id) in ids.iter().enumerate() {
            remote.seed_foreign_change(
                ChangeOperation::Create,
                EntityKind::Category,
                *id,
                json!({ "name": format!("c{i}") }),
            );
        }
        let factory = MemoryStoreFactory::new();
        let mut store = factory.open().unwrap();
        let metadata = MemoryMetadataStore::new();
        let mut meta = SyncMetadata::default();

        let summary = pull(&remote, &mut store, &metadata, &mut meta, &PendingDeletes::default()).await;

        assert_eq!(summary.applied, 5);
        assert_eq!(summary.pages, 3);
        assert_eq!(meta.cursor, 5);
        assert_eq!(metadata.load("test").unwrap().cursor, 5);
        let stored = store.find(EntityKind::Category, ids[4]).unwrap().unwrap();
        assert_eq!(stored.sync_status(), SyncStatus::Synced);
    }

    #[tokio::test]
    async fn drops_changes_for_pending_deletes() {
        let remote = remote();
        let id = EntityId::new();
        remote.seed_foreign_change(ChangeOperation::Create, EntityKind::Region, id, json!({ "name": "x" }));
        let factory = MemoryStoreFactory::new();
        let mut store = factory.open().unwrap();
        let metadata = MemoryMetadataStore::new();
        let mut meta = SyncMetadata::default();
        let deletes = PendingDeletes::capture(&BTreeSet::new(), [id].into());

        let summary = pull(&remote, &mut store, &metadata, &mut meta, &deletes).await;

        assert_eq!(summary.skipped_resurrections, 1);
        assert!(store.find(EntityKind::Region, id).unwrap().is_none());
        // the entry is consumed even though it was dropped
        assert_eq!(meta.cursor, 1);
    }

    #[tokio::test]
    async fn delete_of_unknown_entity_is_a_no_op() {
        let remote = remote();
        remote.seed_foreign_change(ChangeOperation::Delete, EntityKind::Event, EntityId::new(), json!(null));
        let factory = MemoryStoreFactory::new();
        let mut store = factory.open().unwrap();
        let metadata = MemoryMetadataStore::new();
        let mut meta = SyncMetadata::default();

        let summary = pull(&remote, &mut store, &metadata, &mut meta, &PendingDeletes::default()).await;
        assert_eq!(summary.applied, 1);
        assert_eq!(meta.cursor, 1);
    }

    #[tokio::test]
    async fn failed_page_leaves_cursor() {
        let remote = remote();
        let id = EntityId::new();
        remote.seed_foreign_change(ChangeOperation::Create, EntityKind::Category, id, json!({ "name": "a" }));
        remote
            .faults()
            .fail_next(Endpoint::Changes, RemoteError::Network("reset".into()), 1);
        let factory = MemoryStoreFactory::new();
        let mut store = factory.open().unwrap();
        let metadata = MemoryMetadataStore::new();
        let mut meta = SyncMetadata::default();
        let config = SyncConfig::new("test");

        let err = PullPhase {
            client: &remote,
            store: &mut store,
            metadata: &metadata,
            meta: &mut meta,
            deletes: &PendingDeletes::default(),
            config: &config,
        }
        .run()
        .await
        .unwrap_err();

        assert!(matches!(err, SyncError::Remote(RemoteError::Network(_))));
        assert_eq!(meta.cursor, 0);
        assert_eq!(metadata.load("test").unwrap().cursor, 0);
        assert!(store.find(EntityKind::Category, id).unwrap().is_none());
    }

    #[tokio::test]
    async fn pulled_entity_with_local_edit_stays_pending() {
        let remote = remote();
        let id = EntityId::new();
        remote.seed_foreign_change(ChangeOperation::Update, EntityKind::Category, id, json!({ "name": "remote" }));
        let factory = MemoryStoreFactory::new();
        let mut store = factory.open().unwrap();
        store
            .insert_mutation(PendingMutation::new(
                EntityKind::Category,
                MutationOperation::Update,
                id,
                json!({ "name": "local" }),
                0,
            ))
            .unwrap();
        let metadata = MemoryMetadataStore::new();
        let mut meta = SyncMetadata::default();

        pull(&remote, &mut store, &metadata, &mut meta, &PendingDeletes::default()).await;

        let stored = store.find(EntityKind::Category, id).unwrap().unwrap();
        assert_eq!(stored.sync_status(), SyncStatus::Pending);
    }
}
