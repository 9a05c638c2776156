//! # offsync store
//!
//! Local persistence for the offline-first sync engine.
//!
//! This crate provides the lowest-level storage abstraction: a cache of
//! entities plus the durable mutation queue, and the small metadata
//! document (cursor, resurrection set, breaker state) the engine keeps
//! per backend environment.
//!
//! ## Design Principles
//!
//! - A [`StoreFactory`] hands out independent [`LocalStore`] handles; a
//!   handle is never shared between execution contexts
//! - Records cross handles by id, never by reference
//! - `commit` is the durability point
//! - File documents are replaced atomically (write, sync, rename)
//!
//! ## Available Backends
//!
//! - [`MemoryStoreFactory`] / [`MemoryMetadataStore`] - For testing and ephemeral use
//! - [`FileStoreFactory`] / [`FileMetadataStore`] - For persistent storage
//!
//! ## Example
//!
//! ```rust
//! use offsync_protocol::{Entity, EntityId, EntityKind};
//! use offsync_store::{LocalStore, MemoryStoreFactory, StoreFactory};
//!
//! let factory = MemoryStoreFactory::new();
//! let mut store = factory.open().unwrap();
//! let id = EntityId::new();
//! store.insert(Entity::empty(EntityKind::Category, id)).unwrap();
//! store.commit().unwrap();
//!
//! let other = factory.open().unwrap();
//! assert!(other.find(EntityKind::Category, id).unwrap().is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod data;
mod error;
mod file;
mod memory;
mod metadata;
mod store;

pub use error::{StoreError, StoreResult};
pub use file::{FileStore, FileStoreFactory};
pub use memory::{MemoryStore, MemoryStoreFactory};
pub use metadata::{
    BreakerSnapshot, FileMetadataStore, MemoryMetadataStore, MetadataStore, SyncMetadata,
};
pub use store::{LocalStore, RelinkReport, StoreFactory};
