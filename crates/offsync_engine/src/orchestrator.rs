//! The sync orchestrator: one serialized owner of all sync state.

use crate::bootstrap::BootstrapPhase;
use crate::breaker::CircuitBreaker;
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::SyncEvent;
use crate::pull::PullPhase;
use crate::push::PushPhase;
use crate::queue::MutationQueue;
use crate::remote::call;
use crate::resurrection::PendingDeletes;
use crate::state::{SyncOutcome, SyncReport, SyncSnapshot, SyncState};
use offsync_protocol::{Entity, EntityId, EntityKind, MutationOperation, NetworkClient, PendingMutation};
use offsync_store::{LocalStore, MetadataStore, StoreFactory, SyncMetadata};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, info_span, warn, Instrument};

const EVENT_CAPACITY: usize = 64;

/// State owned by whichever pass holds the lock.
struct Inner {
    breaker: CircuitBreaker,
    meta: SyncMetadata,
}

/// Values mirrored out of [`Inner`] for lock-free snapshots.
#[derive(Debug, Default, Clone, Copy)]
struct Mirror {
    last_sync_at: Option<u64>,
    backoff_until: Option<u64>,
}

/// Drives sync passes between a [`LocalStore`] and a [`NetworkClient`].
///
/// # Passes
///
/// [`perform_sync`] runs one pass:
///
/// 1. Returns `Skipped` if another pass holds the serialized context
/// 2. Returns `RateLimited` without network calls while the breaker is open
/// 3. Probes the remote; on failure returns `Offline` and stays idle
/// 4. Captures the resurrection set from the queue and persists it
/// 5. Pushes queued mutations
/// 6. Bootstraps if no cursor is stored (or one was requested), otherwise
///    pulls the change feed
/// 7. Persists metadata and returns to idle
///
/// Each pass opens a fresh store handle from the factory; nothing holding
/// a handle outlives the pass.
///
/// [`perform_sync`]: SyncOrchestrator::perform_sync
pub struct SyncOrchestrator<C, F> {
    config: SyncConfig,
    client: C,
    factory: F,
    metadata: Arc<dyn MetadataStore>,
    clock: Arc<dyn Clock>,
    queue: MutationQueue,
    inner: Mutex<Inner>,
    state: watch::Sender<SyncState>,
    events: broadcast::Sender<SyncEvent>,
    mirror: RwLock<Mirror>,
}

impl<C: NetworkClient, F: StoreFactory> SyncOrchestrator<C, F> {
    /// Creates an orchestrator using the system clock.
    ///
    /// Loads the persisted metadata of `config.environment`, restoring the
    /// cursor and circuit-breaker state of the previous run.
    pub fn new(
        config: SyncConfig,
        client: C,
        factory: F,
        metadata: Arc<dyn MetadataStore>,
    ) -> SyncResult<Self> {
        Self::with_clock(config, client, factory, metadata, Arc::new(SystemClock))
    }

    /// Creates an orchestrator with an explicit clock.
    pub fn with_clock(
        config: SyncConfig,
        client: C,
        factory: F,
        metadata: Arc<dyn MetadataStore>,
        clock: Arc<dyn Clock>,
    ) -> SyncResult<Self> {
        let meta = metadata.load(&config.environment)?;
        let breaker = CircuitBreaker::restore(config.breaker.clone(), meta.breaker);
        let mirror = Mirror {
            last_sync_at: meta.last_sync_at,
            backoff_until: meta.breaker.backoff_until,
        };
        debug!(
            environment = %config.environment,
            cursor = meta.cursor,
            pending_deletes = meta.pending_delete_ids.len(),
            "loaded sync metadata"
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            queue: MutationQueue::new(config.max_mutation_attempts, Arc::clone(&clock)),
            config,
            client,
            factory,
            metadata,
            clock,
            inner: Mutex::new(Inner { breaker, meta }),
            state: watch::channel(SyncState::Idle).0,
            events,
            mirror: RwLock::new(mirror),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the mutation queue.
    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    /// Durably queues a mutation without touching the entity.
    ///
    /// Returns `None` if `(entity_id, operation)` is already pending.
    pub fn queue_mutation(
        &self,
        kind: EntityKind,
        operation: MutationOperation,
        entity_id: EntityId,
        payload: Value,
    ) -> SyncResult<Option<PendingMutation>> {
        let mut store = self.factory.open()?;
        self.queue
            .enqueue(&mut store, kind, operation, entity_id, payload)
    }

    /// Applies a local change and queues its mutation in one commit.
    ///
    /// See [`MutationQueue::stage`].
    pub fn stage_change(&self, operation: MutationOperation, entity: Entity) -> SyncResult<bool> {
        let mut store = self.factory.open()?;
        self.queue.stage(&mut store, operation, entity)
    }

    /// Returns the current state.
    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Subscribes to sync events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Returns a point-in-time view without waiting for a running pass.
    pub fn snapshot(&self) -> SyncResult<SyncSnapshot> {
        let pending_mutations = self.factory.open()?.pending_mutation_count()?;
        let mirror = *self.mirror.read();
        let now = self.clock.now_millis();
        Ok(SyncSnapshot {
            state: self.state(),
            pending_mutations,
            last_sync_at: mirror.last_sync_at,
            circuit_open_until: mirror.backoff_until.filter(|until| now < *until),
        })
    }

    /// Clears the circuit breaker so the next trigger runs immediately.
    ///
    /// Waits for a running pass to finish.
    pub async fn reset_circuit_breaker(&self) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        inner.breaker.reset();
        inner.meta.breaker = inner.breaker.snapshot();
        self.metadata.save(&self.config.environment, &inner.meta)?;
        self.refresh_mirror(&inner);
        self.state.send_if_modified(|state| {
            if matches!(state, SyncState::RateLimited { .. }) {
                *state = SyncState::Idle;
                return true;
            }
            false
        });
        info!("circuit breaker reset");
        Ok(())
    }

    /// Makes the next pass bootstrap even though a cursor is stored.
    pub async fn request_bootstrap(&self) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        inner.meta.force_bootstrap = true;
        self.metadata.save(&self.config.environment, &inner.meta)?;
        debug!("bootstrap requested");
        Ok(())
    }

    /// Runs one sync pass.
    ///
    /// Never fails: every problem is reported through the returned outcome
    /// and the observable state, which keeps it until the next trigger.
    pub async fn perform_sync(&self) -> SyncOutcome {
        let Ok(mut inner) = self.inner.try_lock() else {
            debug!("pass already running, trigger dropped");
            return SyncOutcome::Skipped;
        };
        let span = info_span!("sync_pass", environment = %self.config.environment);
        self.run_pass(&mut inner).instrument(span).await
    }

    async fn run_pass(&self, inner: &mut Inner) -> SyncOutcome {
        if let Some(retry_after) = inner.breaker.retry_after(self.clock.now_millis()) {
            debug!(?retry_after, "circuit open, refusing pass");
            return self.rate_limited(retry_after);
        }

        if let Err(e) = call(self.config.request_timeout, self.client.get_latest_cursor()).await {
            if e.is_rate_limited() {
                let tripped = inner.breaker.record_rate_limit(self.clock.now_millis());
                self.persist(inner);
                if tripped {
                    if let Some(retry_after) = inner.breaker.retry_after(self.clock.now_millis()) {
                        return self.rate_limited(retry_after);
                    }
                }
            }
            debug!(error = %e, "health check failed");
            self.state.send_replace(SyncState::Idle);
            return SyncOutcome::Offline;
        }

        let _ = self.events.send(SyncEvent::PassStarted);
        let started = Instant::now();

        let mut store = match self.factory.open() {
            Ok(store) => store,
            Err(e) => return self.failed(SyncError::from(e)),
        };
        let mut deletes = match self.capture_deletes(&store, inner) {
            Ok(deletes) => deletes,
            Err(e) => return self.failed(e),
        };

        let mut result = self.execute(&mut store, inner, &mut deletes).await;
        drop(store);

        if let Err(SyncError::Remote(e)) = &result {
            if e.is_rate_limited() && inner.breaker.record_rate_limit(self.clock.now_millis()) {
                let retry_after = inner
                    .breaker
                    .retry_after(self.clock.now_millis())
                    .unwrap_or_default();
                result = Err(SyncError::RateLimited { retry_after });
            }
        }

        inner.meta.pending_delete_ids = deletes.remaining();
        if result.is_ok() {
            inner.meta.last_sync_at = Some(self.clock.now_millis());
        }
        inner.meta.breaker = inner.breaker.snapshot();
        if let Err(e) = self.metadata.save(&self.config.environment, &inner.meta) {
            if result.is_ok() {
                result = Err(e.into());
            } else {
                warn!(error = %e, "could not persist sync metadata");
            }
        }
        self.refresh_mirror(inner);

        match result {
            Ok(mut report) => {
                report.duration = started.elapsed();
                self.state.send_replace(SyncState::Idle);
                info!(
                    pushed = report.pushed,
                    failed = report.failed,
                    abandoned = report.abandoned,
                    pulled = report.pulled,
                    skipped = report.skipped_resurrections,
                    cursor = report.cursor,
                    bootstrapped = report.bootstrapped,
                    duration_ms = report.duration.as_millis() as u64,
                    "sync pass completed"
                );
                let _ = self.events.send(SyncEvent::PassCompleted(report.clone()));
                SyncOutcome::Completed(report)
            }
            Err(SyncError::RateLimited { retry_after }) => self.rate_limited(retry_after),
            Err(e) => self.failed(e),
        }
    }

    /// Push then pull (or bootstrap) with a captured resurrection set.
    async fn execute(
        &self,
        store: &mut F::Store,
        inner: &mut Inner,
        deletes: &mut PendingDeletes,
    ) -> SyncResult<SyncReport> {
        let Inner { breaker, meta } = inner;

        let push = PushPhase {
            client: &self.client,
            store: &mut *store,
            queue: &self.queue,
            breaker,
            deletes: &mut *deletes,
            config: &self.config,
            clock: &*self.clock,
            state: &self.state,
            events: &self.events,
        }
        .run()
        .await?;

        let mut report = SyncReport {
            pushed: push.pushed,
            duplicates: push.duplicates,
            failed: push.failed,
            abandoned: push.abandoned,
            deferred: push.deferred,
            ..SyncReport::default()
        };

        self.state.send_replace(SyncState::Pulling);
        if meta.needs_bootstrap() {
            let summary = BootstrapPhase {
                client: &self.client,
                store,
                metadata: &*self.metadata,
                meta: &mut *meta,
                deletes: &*deletes,
                config: &self.config,
            }
            .run()
            .await?;
            report.pulled = summary.loaded + summary.restored;
            report.skipped_resurrections = summary.skipped_resurrections;
            report.bootstrapped = true;
            let _ = self.events.send(SyncEvent::BootstrapCompleted {
                cursor: summary.cursor,
            });
        } else {
            let summary = PullPhase {
                client: &self.client,
                store,
                metadata: &*self.metadata,
                meta: &mut *meta,
                deletes: &*deletes,
                config: &self.config,
            }
            .run()
            .await?;
            debug!(pages = summary.pages, applied = summary.applied, "pull finished");
            report.pulled = summary.applied;
            report.skipped_resurrections = summary.skipped_resurrections;
        }
        report.cursor = meta.cursor;
        Ok(report)
    }

    /// Rebuilds the resurrection set and persists it before any network
    /// work, cross-checking the persisted snapshot against the queue.
    fn capture_deletes(&self, store: &F::Store, inner: &mut Inner) -> SyncResult<PendingDeletes> {
        let queued = self.queue.pending_delete_ids(store)?;
        let deletes = PendingDeletes::capture(&inner.meta.pending_delete_ids, queued);
        if deletes.ids() != &inner.meta.pending_delete_ids {
            inner.meta.pending_delete_ids = deletes.ids().clone();
            self.metadata.save(&self.config.environment, &inner.meta)?;
        }
        debug!(pending_deletes = deletes.len(), "captured resurrection set");
        Ok(deletes)
    }

    fn persist(&self, inner: &mut Inner) {
        inner.meta.breaker = inner.breaker.snapshot();
        if let Err(e) = self.metadata.save(&self.config.environment, &inner.meta) {
            warn!(error = %e, "could not persist circuit breaker state");
        }
        self.refresh_mirror(inner);
    }

    fn refresh_mirror(&self, inner: &Inner) {
        *self.mirror.write() = Mirror {
            last_sync_at: inner.meta.last_sync_at,
            backoff_until: inner.breaker.snapshot().backoff_until,
        };
    }

    fn rate_limited(&self, retry_after: Duration) -> SyncOutcome {
        let pending = self
            .factory
            .open()
            .and_then(|store| store.pending_mutation_count())
            .unwrap_or_else(|e| {
                warn!(error = %e, "could not count pending mutations");
                0
            });
        warn!(retry_after_secs = retry_after.as_secs(), pending, "sync rate limited");
        self.state.send_replace(SyncState::RateLimited {
            retry_after,
            pending,
        });
        SyncOutcome::RateLimited {
            retry_after,
            pending,
        }
    }

    fn failed(&self, error: SyncError) -> SyncOutcome {
        let message = error.to_string();
        warn!(error = %message, "sync pass failed");
        self.state.send_replace(SyncState::Error(message.clone()));
        SyncOutcome::Failed(message)
    }
}
