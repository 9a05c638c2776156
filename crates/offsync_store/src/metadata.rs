//! Persisted per-environment sync metadata.
//!
//! The metadata document is the only state shared across sync passes and
//! process restarts besides the store itself: the change-feed cursor, the
//! resurrection set, the last-sync timestamp and the circuit-breaker
//! backoff. It is keyed by backend environment so that switching between
//! environments never mixes their histories.

use crate::error::{StoreError, StoreResult};
use crate::file::write_atomically;
use offsync_protocol::{Cursor, EntityId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Persisted sync state for one environment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncMetadata {
    /// Last applied change-feed position; 0 means a bootstrap is needed.
    pub cursor: Cursor,
    /// Entities with a DELETE not yet confirmed by the remote.
    pub pending_delete_ids: BTreeSet<EntityId>,
    /// When the last pass completed, unix millis.
    pub last_sync_at: Option<u64>,
    /// Circuit-breaker state.
    pub breaker: BreakerSnapshot,
    /// Run a bootstrap on the next pass even though a cursor exists.
    pub force_bootstrap: bool,
}

impl SyncMetadata {
    /// Returns true if the next pull must be a bootstrap.
    pub fn needs_bootstrap(&self) -> bool {
        self.cursor == 0 || self.force_bootstrap
    }
}

/// Persisted circuit-breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSnapshot {
    /// Rate-limit errors seen since the last success.
    pub consecutive_rate_limit_errors: u32,
    /// Sync attempts are refused until this time, unix millis.
    pub backoff_until: Option<u64>,
    /// Multiplier applied to the next trip's base backoff.
    pub backoff_multiplier: f64,
}

impl Default for BreakerSnapshot {
    fn default() -> Self {
        Self {
            consecutive_rate_limit_errors: 0,
            backoff_until: None,
            backoff_multiplier: 1.0,
        }
    }
}

/// Loads and saves [`SyncMetadata`] per environment.
///
/// A missing document loads as the default (cursor unset).
pub trait MetadataStore: Send + Sync {
    /// Loads the metadata of `environment`.
    fn load(&self, environment: &str) -> StoreResult<SyncMetadata>;

    /// Replaces the metadata of `environment`.
    fn save(&self, environment: &str, metadata: &SyncMetadata) -> StoreResult<()>;
}

/// Metadata kept in memory, for tests.
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    documents: RwLock<HashMap<String, SyncMetadata>>,
}

impl MemoryMetadataStore {
    /// Creates an empty metadata store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn load(&self, environment: &str) -> StoreResult<SyncMetadata> {
        Ok(self
            .documents
            .read()
            .get(environment)
            .cloned()
            .unwrap_or_default())
    }

    fn save(&self, environment: &str, metadata: &SyncMetadata) -> StoreResult<()> {
        self.documents
            .write()
            .insert(environment.to_string(), metadata.clone());
        Ok(())
    }
}

/// Metadata stored as `sync-state.<environment>.json` files in a directory.
#[derive(Debug)]
pub struct FileMetadataStore {
    dir: PathBuf,
}

impl FileMetadataStore {
    /// Opens a metadata directory, creating it if needed.
    pub fn open(dir: &Path) -> StoreResult<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn file_name(environment: &str) -> StoreResult<String> {
        let valid = !environment.is_empty()
            && environment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidEnvironment(environment.to_string()));
        }
        Ok(format!("sync-state.{environment}.json"))
    }
}

impl MetadataStore for FileMetadataStore {
    fn load(&self, environment: &str) -> StoreResult<SyncMetadata> {
        let path = self.dir.join(Self::file_name(environment)?);
        if !path.exists() {
            return Ok(SyncMetadata::default());
        }
        let bytes = fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn save(&self, environment: &str, metadata: &SyncMetadata) -> StoreResult<()> {
        let name = Self::file_name(environment)?;
        let bytes = serde_json::to_vec_pretty(metadata)?;
        write_atomically(&self.dir, &name, &bytes)?;
        debug!(environment, cursor = metadata.cursor, "saved sync metadata");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> SyncMetadata {
        SyncMetadata {
            cursor: 42,
            pending_delete_ids: [EntityId::new()].into_iter().collect(),
            last_sync_at: Some(1_700_000_000_000),
            breaker: BreakerSnapshot {
                consecutive_rate_limit_errors: 2,
                backoff_until: Some(1_700_000_030_000),
                backoff_multiplier: 4.0,
            },
            force_bootstrap: false,
        }
    }

    #[test]
    fn missing_document_needs_bootstrap() {
        let store = MemoryMetadataStore::new();
        let loaded = store.load("production").unwrap();
        assert_eq!(loaded.cursor, 0);
        assert!(loaded.needs_bootstrap());
        assert_eq!(loaded.breaker.backoff_multiplier, 1.0);
    }

    #[test]
    fn environments_are_isolated() {
        let store = MemoryMetadataStore::new();
        let meta = sample();
        store.save("staging", &meta).unwrap();
        assert_eq!(store.load("staging").unwrap(), meta);
        assert_eq!(store.load("production").unwrap(), SyncMetadata::default());
    }

    #[test]
    fn file_store_persists_across_instances() {
        let temp = tempdir().unwrap();
        let meta = sample();
        FileMetadataStore::open(temp.path())
            .unwrap()
            .save("staging", &meta)
            .unwrap();

        let reopened = FileMetadataStore::open(temp.path()).unwrap();
        assert_eq!(reopened.load("staging").unwrap(), meta);
        assert!(temp.path().join("sync-state.staging.json").exists());
        assert_eq!(reopened.load("production").unwrap().cursor, 0);
    }

    #[test]
    fn rejects_path_like_environment() {
        let temp = tempdir().unwrap();
        let store = FileMetadataStore::open(temp.path()).unwrap();
        for bad in ["", "../prod", "a/b", "prod.json"] {
            assert!(matches!(
                store.load(bad),
                Err(StoreError::InvalidEnvironment(_))
            ));
        }
    }

    #[test]
    fn partial_document_fills_defaults() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("sync-state.dev.json"), br#"{"cursor": 9}"#).unwrap();
        let loaded = FileMetadataStore::open(temp.path()).unwrap().load("dev").unwrap();
        assert_eq!(loaded.cursor, 9);
        assert!(loaded.pending_delete_ids.is_empty());
        assert_eq!(loaded.breaker.backoff_multiplier, 1.0);
    }

    #[test]
    fn forced_bootstrap_overrides_cursor() {
        let meta = SyncMetadata {
            cursor: 10,
            force_bootstrap: true,
            ..Default::default()
        };
        assert!(meta.needs_bootstrap());
    }
}
