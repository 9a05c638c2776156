//! # offsync server
//!
//! Reference remote for the offsync engine, running in process.
//!
//! This crate provides:
//! - Per-kind entity collections with last-write-wins updates
//! - A cursor-ordered change log served through `get_changes`
//! - An idempotency ledger so retried writes collapse to one effect
//! - Batch create with per-item results
//! - Fault injection (offline, rate limits, server errors, lost
//!   responses, rejected entities, latency) for exercising the engine
//!
//! # Example
//!
//! ```
//! use offsync_protocol::{EntityId, EntityKind, NetworkClient};
//! use offsync_server::{InMemoryRemote, ServerConfig};
//! use serde_json::json;
//!
//! # tokio_test_block(async {
//! let remote = InMemoryRemote::new(ServerConfig::default());
//! let id = EntityId::new();
//! remote
//!     .create(EntityKind::Category, id, json!({ "name": "Work" }))
//!     .await
//!     .unwrap();
//! assert_eq!(remote.get_latest_cursor().await.unwrap(), 1);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread()
//! #         .enable_all()
//! #         .build()
//! #         .unwrap()
//! #         .block_on(f)
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod changelog;
mod config;
mod error;
mod faults;
mod handler;
mod server;

pub use changelog::ChangeLog;
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use faults::{Endpoint, FaultPlan};
pub use server::InMemoryRemote;
