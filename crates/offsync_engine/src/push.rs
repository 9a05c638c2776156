//! Push phase: flush queued mutations to the remote.
//!
//! Mutations go out in three streams:
//! 1. Creates of kinds without batch support, one call each
//! 2. Creates of batchable kinds, `push_batch_size` per call
//! 3. Updates and deletes, one call each
//!
//! Creates precede everything else so that a later update or delete
//! never targets a record the remote has not seen yet. Within a stream
//! mutations keep queue order.

use crate::breaker::CircuitBreaker;
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::SyncEvent;
use crate::queue::{FailureDisposition, MutationQueue};
use crate::remote::call;
use crate::resurrection::PendingDeletes;
use crate::state::SyncState;
use offsync_protocol::{
    BatchCreateItem, Entity, EntityId, EntityKind, MutationOperation, NetworkClient,
    PendingMutation, RemoteError, RemoteResult, SyncStatus,
};
use offsync_store::LocalStore;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

/// Counters produced by one push phase.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct PushSummary {
    pub pushed: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub deferred: usize,
}

/// Everything one push phase borrows from the orchestrator.
pub(crate) struct PushPhase<'a, C, S> {
    pub client: &'a C,
    pub store: &'a mut S,
    pub queue: &'a MutationQueue,
    pub breaker: &'a mut CircuitBreaker,
    pub deletes: &'a mut PendingDeletes,
    pub config: &'a SyncConfig,
    pub clock: &'a dyn Clock,
    pub state: &'a watch::Sender<SyncState>,
    pub events: &'a broadcast::Sender<SyncEvent>,
}

impl<C: NetworkClient, S: LocalStore> PushPhase<'_, C, S> {
    /// Runs the phase.
    ///
    /// Returns `SyncError::RateLimited` if the breaker trips, or the remote
    /// error if a network or server failure makes further calls pointless.
    /// Mutations already confirmed stay confirmed either way.
    pub(crate) async fn run(mut self) -> SyncResult<PushSummary> {
        let mutations = self.queue.pending(&*self.store)?;
        let total = mutations.len();
        self.progress(0, total);

        let mut singles = Vec::new();
        let mut batches: BTreeMap<EntityKind, Vec<PendingMutation>> = BTreeMap::new();
        let mut rest = Vec::new();
        for m in mutations {
            match m.operation {
                MutationOperation::Create if m.is_batchable_create() => {
                    batches.entry(m.entity_kind).or_default().push(m)
                }
                MutationOperation::Create => singles.push(m),
                _ => rest.push(m),
            }
        }

        let mut summary = PushSummary::default();
        let mut failed_creates = HashSet::new();
        let mut processed = 0;

        for m in &singles {
            self.push_one(m, &mut summary, &mut failed_creates).await?;
            processed += 1;
            self.progress(processed, total);
        }

        for (kind, group) in &batches {
            for chunk in group.chunks(self.config.batch_size()) {
                self.push_batch(*kind, chunk, &mut summary, &mut failed_creates)
                    .await?;
                processed += chunk.len();
                self.progress(processed, total);
            }
        }

        for m in &rest {
            if failed_creates.contains(&m.entity_id) {
                debug!(entity_id = %m.entity_id, operation = %m.operation, "deferred behind failed create");
                summary.deferred += 1;
            } else {
                self.push_one(m, &mut summary, &mut failed_creates).await?;
            }
            processed += 1;
            self.progress(processed, total);
        }

        Ok(summary)
    }

    async fn push_batch(
        &mut self,
        kind: EntityKind,
        chunk: &[PendingMutation],
        summary: &mut PushSummary,
        failed_creates: &mut HashSet<EntityId>,
    ) -> SyncResult<()> {
        let items = chunk
            .iter()
            .map(|m| BatchCreateItem {
                client_request_id: m.client_request_id,
                entity_id: m.entity_id,
                payload: m.payload.clone(),
            })
            .collect();

        let response = match call(
            self.config.request_timeout,
            self.client.batch_create(kind, items),
        )
        .await
        {
            Ok(response) => response,
            Err(e) => return self.fail(chunk, e, summary, failed_creates),
        };
        debug!(%kind, succeeded = response.succeeded, failed = response.failed, "batch create");
        self.breaker.record_success();

        let mut tripped = false;
        for result in response.results {
            let Some(m) = chunk
                .iter()
                .find(|m| m.client_request_id == result.client_request_id)
            else {
                continue;
            };
            match result.outcome {
                Ok(()) => self.confirm(m, summary)?,
                Err(e) if e.is_conflict() => self.duplicate(m, summary).await?,
                Err(e) if e.is_rate_limited() => {
                    failed_creates.insert(m.entity_id);
                    tripped |= self.breaker.record_rate_limit(self.clock.now_millis());
                }
                Err(e) => self.charge(std::slice::from_ref(m), &e, summary, failed_creates)?,
            }
        }
        self.store.commit()?;

        if tripped {
            return Err(self.rate_limited());
        }
        Ok(())
    }

    async fn push_one(
        &mut self,
        m: &PendingMutation,
        summary: &mut PushSummary,
        failed_creates: &mut HashSet<EntityId>,
    ) -> SyncResult<()> {
        match send(self.client, self.config.request_timeout, m).await {
            Ok(()) => {
                self.breaker.record_success();
                self.confirm(m, summary)?;
            }
            Err(e) if e.is_conflict() && m.operation == MutationOperation::Create => {
                self.duplicate(m, summary).await?;
            }
            Err(e) if e.is_not_found() && m.operation == MutationOperation::Delete => {
                debug!(entity_id = %m.entity_id, "already absent remotely");
                self.breaker.record_success();
                self.confirm(m, summary)?;
            }
            Err(e) => return self.fail(std::slice::from_ref(m), e, summary, failed_creates),
        }
        self.store.commit()?;
        Ok(())
    }

    /// Handles a failed call covering `mutations`.
    fn fail(
        &mut self,
        mutations: &[PendingMutation],
        error: RemoteError,
        summary: &mut PushSummary,
        failed_creates: &mut HashSet<EntityId>,
    ) -> SyncResult<()> {
        failed_creates.extend(
            mutations
                .iter()
                .filter(|m| m.operation == MutationOperation::Create)
                .map(|m| m.entity_id),
        );
        if error.is_rate_limited() {
            if self.breaker.record_rate_limit(self.clock.now_millis()) {
                return Err(self.rate_limited());
            }
            return Ok(());
        }

        // Any answer other than a rate limit ends the streak, timeouts included.
        self.breaker.record_success();
        self.charge(mutations, &error, summary, failed_creates)?;
        self.store.commit()?;
        if error.is_systemic() {
            warn!(%error, "aborting push");
            return Err(error.into());
        }
        Ok(())
    }

    /// Spends one attempt of each mutation.
    fn charge(
        &mut self,
        mutations: &[PendingMutation],
        error: &RemoteError,
        summary: &mut PushSummary,
        failed_creates: &mut HashSet<EntityId>,
    ) -> SyncResult<()> {
        for m in mutations {
            if m.operation == MutationOperation::Create {
                failed_creates.insert(m.entity_id);
            }
            match self.queue.record_failure(&mut *self.store, m, error)? {
                FailureDisposition::Retry => summary.failed += 1,
                FailureDisposition::Abandoned => {
                    summary.abandoned += 1;
                    let _ = self.events.send(SyncEvent::MutationAbandoned {
                        entity_id: m.entity_id,
                        kind: m.entity_kind,
                        operation: m.operation,
                    });
                }
            }
        }
        Ok(())
    }

    fn confirm(&mut self, m: &PendingMutation, summary: &mut PushSummary) -> SyncResult<()> {
        self.queue.complete(&mut *self.store, m)?;
        match m.operation {
            MutationOperation::Delete => self.deletes.confirm(m.entity_id),
            _ => {
                let status = settled_status(&*self.store, m.entity_id)?;
                self.store
                    .set_sync_status(m.entity_kind, m.entity_id, status)?;
            }
        }
        summary.pushed += 1;
        Ok(())
    }

    /// The remote already holds this create: drop the local copy and the
    /// mutation, then adopt the remote record.
    async fn duplicate(&mut self, m: &PendingMutation, summary: &mut PushSummary) -> SyncResult<()> {
        debug!(entity_id = %m.entity_id, "create already applied remotely");
        self.breaker.record_success();
        self.queue.complete(&mut *self.store, m)?;
        self.store.delete(m.entity_kind, m.entity_id)?;
        summary.duplicates += 1;

        if self.deletes.contains(&m.entity_id) {
            return Ok(());
        }
        let fetched = call(
            self.config.request_timeout,
            self.client.get(m.entity_kind, m.entity_id),
        )
        .await;
        match fetched {
            Ok(Some(payload)) => match Entity::from_payload(m.entity_kind, m.entity_id, &payload) {
                Ok(mut entity) => {
                    entity.set_sync_status(settled_status(&*self.store, m.entity_id)?);
                    self.store.insert(entity)?;
                }
                Err(e) => warn!(entity_id = %m.entity_id, error = %e, "unreadable remote copy"),
            },
            Ok(None) => {}
            Err(e) => debug!(entity_id = %m.entity_id, error = %e, "remote copy left to the pull"),
        }
        Ok(())
    }

    fn rate_limited(&self) -> SyncError {
        let retry_after = self
            .breaker
            .retry_after(self.clock.now_millis())
            .unwrap_or_default();
        SyncError::RateLimited { retry_after }
    }

    fn progress(&self, synced: usize, total: usize) {
        self.state.send_replace(SyncState::Syncing { synced, total });
    }
}

/// Delivers one mutation with its idempotency key.
async fn send<C: NetworkClient>(
    client: &C,
    timeout: Duration,
    m: &PendingMutation,
) -> RemoteResult<()> {
    match m.operation {
        MutationOperation::Create => call(
            timeout,
            client.create_with_idempotency_key(
                m.entity_kind,
                m.entity_id,
                m.payload.clone(),
                m.client_request_id,
            ),
        )
        .await
        .map(|_| ()),
        MutationOperation::Update => call(
            timeout,
            client.update(m.entity_kind, m.entity_id, m.payload.clone(), m.client_request_id),
        )
        .await
        .map(|_| ()),
        MutationOperation::Delete => {
            call(
                timeout,
                client.delete(m.entity_kind, m.entity_id, m.client_request_id),
            )
            .await
        }
    }
}

/// Synced unless the entity still has local changes queued.
pub(crate) fn settled_status<S: LocalStore + ?Sized>(
    store: &S,
    id: EntityId,
) -> SyncResult<SyncStatus> {
    let dirty = store.has_pending_for(id, MutationOperation::Create)?
        || store.has_pending_for(id, MutationOperation::Update)?;
    Ok(if dirty {
        SyncStatus::Pending
    } else {
        SyncStatus::Synced
    })
}
