//! # offsync protocol
//!
//! Wire-level types shared by the local store, the sync engine and any
//! remote implementation.
//!
//! This crate provides:
//! - `EntityId` (time-ordered) and `ClientRequestId` (idempotency key)
//! - The syncable entity kinds and their concrete records
//! - `PendingMutation` records for the outbound queue
//! - Change-feed pages and paginated collection pages
//! - The `NetworkClient` contract and the `RemoteError` taxonomy
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod client;
mod entity;
mod error;
mod id;
mod mutation;

pub use change::{ChangeOperation, ChangeRecord, ChangesPage, Cursor, EntityPage};
pub use client::{BatchCreateItem, BatchCreateResponse, BatchItemResult, NetworkClient};
pub use entity::{
    Category, Entity, EntityKind, Event, PropertyDefinition, PropertyValueType, Region,
    SyncStatus,
};
pub use error::{RemoteError, RemoteResult};
pub use id::{ClientRequestId, EntityId};
pub use mutation::{MutationOperation, PendingMutation};
