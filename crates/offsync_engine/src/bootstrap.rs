//! Bootstrap: discard the local cache and reload it from the remote.

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::push::settled_status;
use crate::remote::call;
use crate::resurrection::PendingDeletes;
use offsync_protocol::{Cursor, Entity, EntityKind, MutationOperation, NetworkClient, SyncStatus};
use offsync_store::{LocalStore, MetadataStore, RelinkReport, SyncMetadata};
use tracing::{debug, info, warn};

/// Result of one bootstrap.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct BootstrapSummary {
    pub loaded: usize,
    pub skipped_resurrections: usize,
    pub restored: usize,
    pub relink: RelinkReport,
    pub cursor: Cursor,
}

/// Everything one bootstrap borrows from the orchestrator.
pub(crate) struct BootstrapPhase<'a, C, S> {
    pub client: &'a C,
    pub store: &'a mut S,
    pub metadata: &'a dyn MetadataStore,
    pub meta: &'a mut SyncMetadata,
    pub deletes: &'a PendingDeletes,
    pub config: &'a SyncConfig,
}

impl<C: NetworkClient, S: LocalStore> BootstrapPhase<'_, C, S> {
    /// Runs the bootstrap.
    ///
    /// The cursor is cleared and persisted first, so any failure leaves it
    /// unset and the next pass bootstraps again. The baseline cursor is
    /// read before the collections are listed; changes landing during the
    /// listing are replayed by the next incremental pull.
    pub(crate) async fn run(mut self) -> SyncResult<BootstrapSummary> {
        self.meta.cursor = 0;
        self.metadata.save(&self.config.environment, self.meta)?;

        let baseline = call(self.config.request_timeout, self.client.get_latest_cursor()).await?;
        debug!(baseline, "bootstrap started");

        for kind in EntityKind::DEPENDENCY_ORDER {
            let removed = self.store.delete_all(kind)?;
            debug!(%kind, removed, "cleared local cache");
        }
        self.store.commit()?;

        let mut summary = BootstrapSummary::default();
        for kind in EntityKind::DEPENDENCY_ORDER {
            self.load_kind(kind, &mut summary).await?;
            self.store.commit()?;
        }

        summary.relink = self.store.relink()?;
        if !summary.relink.dangling.is_empty() {
            warn!(
                resolved = summary.relink.resolved,
                dangling = summary.relink.dangling.len(),
                "bootstrap left dangling references"
            );
        }

        summary.restored = self.restore_local_changes()?;
        self.store.commit()?;

        self.meta.cursor = baseline;
        self.meta.force_bootstrap = false;
        self.metadata.save(&self.config.environment, self.meta)?;
        summary.cursor = baseline;

        info!(
            loaded = summary.loaded,
            restored = summary.restored,
            cursor = baseline,
            "bootstrap completed"
        );
        Ok(summary)
    }

    async fn load_kind(&mut self, kind: EntityKind, summary: &mut BootstrapSummary) -> SyncResult<()> {
        let mut offset = 0;
        loop {
            let page = call(
                self.config.request_timeout,
                self.client.list(kind, offset, self.config.bootstrap_limit()),
            )
            .await?;

            for (id, payload) in &page.items {
                if self.deletes.contains(id)
                    || self.store.has_pending_for(*id, MutationOperation::Delete)?
                {
                    summary.skipped_resurrections += 1;
                    continue;
                }
                match Entity::from_payload(kind, *id, payload) {
                    Ok(mut entity) => {
                        entity.set_sync_status(SyncStatus::Synced);
                        self.store.insert(entity)?;
                        summary.loaded += 1;
                    }
                    Err(e) => warn!(entity_id = %id, %kind, error = %e, "skipping malformed entity"),
                }
            }

            match page.next_offset {
                Some(next) if next > offset => offset = next,
                Some(_) => {
                    warn!(%kind, offset, "listing made no progress");
                    return Ok(());
                }
                None => return Ok(()),
            }
        }
    }

    /// Reapplies queued creates and updates on top of the reloaded cache so
    /// local work stays visible until it is pushed.
    fn restore_local_changes(&mut self) -> SyncResult<usize> {
        let mut restored = 0;
        for m in self.store.fetch_mutations()? {
            let current = self.store.find(m.entity_kind, m.entity_id)?;
            let mut entity = match (m.operation, current) {
                (MutationOperation::Create, None) => Entity::empty(m.entity_kind, m.entity_id),
                (MutationOperation::Create | MutationOperation::Update, Some(entity)) => entity,
                _ => continue,
            };
            if let Err(e) = entity.apply_payload(&m.payload) {
                warn!(entity_id = %m.entity_id, error = %e, "queued payload no longer applies");
                continue;
            }
            entity.set_sync_status(settled_status(&*self.store, m.entity_id)?);
            self.store.insert(entity)?;
            restored += 1;
        }
        Ok(restored)
    }
}
