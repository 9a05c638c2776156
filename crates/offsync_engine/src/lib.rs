//! # offsync engine
//!
//! Offline-first sync engine.
//!
//! This crate provides:
//! - A durable mutation queue with per-mutation idempotency keys
//! - A rate-limit circuit breaker with persisted exponential backoff
//! - Resurrection prevention for entities deleted locally
//! - Bootstrap (full resync) and cursor-based incremental pull
//! - A single-flight orchestrator publishing observable state
//!
//! ## Architecture
//!
//! Each pass is **push-then-pull**:
//! 1. Flush queued local mutations (creates first, batchable kinds batched)
//! 2. Bootstrap if no cursor is stored, otherwise apply the change feed
//!
//! ## Key Invariants
//!
//! - Local writes are queued before or atomically with the entity write
//! - At most one pending mutation per `(entity, operation)`
//! - At most one pass runs at a time; extra triggers are dropped
//! - The cursor only moves forward and is persisted per applied page
//! - Remote changes never recreate an entity with an unconfirmed delete
//!
//! ## Example
//!
//! ```rust
//! use offsync_engine::{SyncConfig, SyncOrchestrator};
//! use offsync_protocol::{Category, EntityId, EntityKind, MutationOperation};
//! use offsync_server::{InMemoryRemote, ServerConfig};
//! use offsync_store::{MemoryMetadataStore, MemoryStoreFactory};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let remote = InMemoryRemote::new(ServerConfig::default());
//! let engine = SyncOrchestrator::new(
//!     SyncConfig::new("staging"),
//!     remote.clone(),
//!     MemoryStoreFactory::new(),
//!     Arc::new(MemoryMetadataStore::new()),
//! )
//! .unwrap();
//!
//! let category = Category {
//!     id: EntityId::new(),
//!     name: "Work".into(),
//!     ..Default::default()
//! };
//! let id = category.id;
//! engine
//!     .stage_change(MutationOperation::Create, category.into())
//!     .unwrap();
//!
//! let outcome = engine.perform_sync().await;
//! assert_eq!(outcome.report().unwrap().pushed, 1);
//! assert!(remote.entity(EntityKind::Category, id).is_some());
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod bootstrap;
mod breaker;
mod clock;
mod config;
mod error;
mod events;
mod orchestrator;
mod pull;
mod push;
mod queue;
mod remote;
mod resurrection;
mod state;

pub use breaker::CircuitBreaker;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BreakerConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use events::SyncEvent;
pub use orchestrator::SyncOrchestrator;
pub use queue::{FailureDisposition, MutationQueue};
pub use resurrection::PendingDeletes;
pub use state::{SyncOutcome, SyncReport, SyncSnapshot, SyncState};
