//! Test fixtures and store helpers.
//!
//! Provides sample entities and a temporary file store that can be
//! "restarted" to simulate process termination.

use offsync_protocol::{Category, EntityId, Event, Region};
use offsync_server::{InMemoryRemote, ServerConfig};
use offsync_store::{FileMetadataStore, FileStoreFactory};
use serde_json::{json, Value};
use std::path::Path;
use tempfile::TempDir;

/// Returns a category with the given name.
pub fn sample_category(name: &str) -> Category {
    Category {
        id: EntityId::new(),
        name: name.to_string(),
        color: Some("#3366ff".to_string()),
        ..Default::default()
    }
}

/// Returns a region centred on a fixed point.
pub fn sample_region(name: &str) -> Region {
    Region {
        id: EntityId::new(),
        name: name.to_string(),
        latitude: 52.52,
        longitude: 13.405,
        radius_m: 150.0,
        ..Default::default()
    }
}

/// Returns an event with the given title.
pub fn sample_event(title: &str) -> Event {
    Event {
        id: EntityId::new(),
        title: title.to_string(),
        starts_at: 1_700_000_000_000,
        ..Default::default()
    }
}

/// Returns `count` events titled `event-<n>`.
pub fn sample_events(count: usize) -> Vec<Event> {
    (0..count).map(|n| sample_event(&format!("event-{n}"))).collect()
}

/// Returns a remote payload for an event, as another client would write it.
pub fn foreign_event_payload(title: &str) -> Value {
    json!({ "title": title, "starts_at": 1_700_000_000_000u64 })
}

/// Returns a reference remote with default limits.
pub fn test_remote() -> InMemoryRemote {
    InMemoryRemote::new(ServerConfig::default())
}

/// A file-backed store and metadata directory with automatic cleanup.
///
/// Dropping the factory and reopening it from the same directory behaves
/// like a process restart: only committed state survives.
pub struct TestDir {
    temp_dir: TempDir,
}

impl TestDir {
    /// Creates a new temporary directory.
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Returns the root path.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Opens (or reopens) the entity store.
    pub fn open_store(&self) -> FileStoreFactory {
        FileStoreFactory::open_dir(&self.path().join("store")).expect("Failed to open store")
    }

    /// Opens (or reopens) the metadata store.
    pub fn open_metadata(&self) -> FileMetadataStore {
        FileMetadataStore::open(&self.path().join("meta")).expect("Failed to open metadata")
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_protocol::Entity;
    use offsync_store::{LocalStore, StoreFactory};

    #[test]
    fn sample_events_are_distinct() {
        let events = sample_events(3);
        assert_eq!(events.len(), 3);
        assert_ne!(events[0].id, events[1].id);
        assert_eq!(events[2].title, "event-2");
    }

    #[test]
    fn test_dir_reopens() {
        let dir = TestDir::new();
        let entity = Entity::from(sample_category("Home"));
        {
            let mut store = dir.open_store().open().unwrap();
            store.insert(entity.clone()).unwrap();
            store.commit().unwrap();
        }
        let store = dir.open_store().open().unwrap();
        assert!(store.find(entity.kind(), entity.id()).unwrap().is_some());
    }
}
