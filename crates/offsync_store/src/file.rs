//! File-backed store for persistent caches.
//!
//! Directory layout:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK          # Advisory lock for single-process access
//! ├─ store.json    # Entities and mutation queue
//! └─ store.json.tmp
//! ```

use crate::data::{StoreData, StoreDocument};
use crate::error::{StoreError, StoreResult};
use crate::store::{LocalStore, StoreFactory};
use fs2::FileExt;
use offsync_protocol::{
    ClientRequestId, Entity, EntityId, EntityKind, MutationOperation, PendingMutation, SyncStatus,
};
use parking_lot::{Mutex, RwLock};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const LOCK_FILE: &str = "LOCK";
const STORE_FILE: &str = "store.json";

/// Factory for handles onto a store persisted in a directory.
///
/// The factory holds an exclusive lock on the directory; only one factory
/// per directory can exist at a time, across processes.
///
/// # Durability
///
/// Writes through a handle are visible to other handles immediately and
/// reach disk at `commit`, which rewrites `store.json` atomically. A crash
/// before `commit` loses exactly the uncommitted writes.
#[derive(Debug, Clone)]
pub struct FileStoreFactory {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    path: PathBuf,
    data: RwLock<StoreData>,
    /// Serializes document writes between handles.
    write_lock: Mutex<()>,
    _lock_file: File,
}

impl FileStoreFactory {
    /// Opens or creates a store directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another factory holds the directory (returns `Locked`)
    /// - The stored document cannot be decoded
    /// - I/O errors occur
    pub fn open_dir(path: &Path) -> StoreResult<Self> {
        fs::create_dir_all(path)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked(path.to_path_buf()));
        }

        let store_path = path.join(STORE_FILE);
        let data = if store_path.exists() {
            let bytes = fs::read(&store_path)?;
            let doc: StoreDocument = serde_json::from_slice(&bytes)?;
            StoreData::from_document(doc)?
        } else {
            StoreData::default()
        };
        debug!(path = %path.display(), "opened file store");

        Ok(Self {
            shared: Arc::new(Shared {
                path: path.to_path_buf(),
                data: RwLock::new(data),
                write_lock: Mutex::new(()),
                _lock_file: lock_file,
            }),
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.shared.path
    }
}

impl StoreFactory for FileStoreFactory {
    type Store = FileStore;

    fn open(&self) -> StoreResult<FileStore> {
        Ok(FileStore {
            shared: Arc::clone(&self.shared),
            dirty: false,
        })
    }
}

/// A handle onto a [`FileStoreFactory`]'s store.
#[derive(Debug)]
pub struct FileStore {
    shared: Arc<Shared>,
    dirty: bool,
}

impl LocalStore for FileStore {
    fn upsert(
        &mut self,
        kind: EntityKind,
        id: EntityId,
        mutate: &mut dyn FnMut(&mut Entity),
    ) -> StoreResult<()> {
        self.shared.data.write().upsert(kind, id, mutate);
        self.dirty = true;
        Ok(())
    }

    fn delete(&mut self, kind: EntityKind, id: EntityId) -> StoreResult<bool> {
        let removed = self.shared.data.write().delete(kind, id);
        self.dirty |= removed;
        Ok(removed)
    }

    fn delete_all(&mut self, kind: EntityKind) -> StoreResult<usize> {
        let removed = self.shared.data.write().delete_all(kind);
        self.dirty |= removed > 0;
        Ok(removed)
    }

    fn find(&self, kind: EntityKind, id: EntityId) -> StoreResult<Option<Entity>> {
        Ok(self.shared.data.read().find(kind, id))
    }

    fn fetch_all(&self, kind: EntityKind) -> StoreResult<Vec<Entity>> {
        Ok(self.shared.data.read().fetch_all(kind))
    }

    fn set_sync_status(
        &mut self,
        kind: EntityKind,
        id: EntityId,
        status: SyncStatus,
    ) -> StoreResult<bool> {
        let found = self.shared.data.write().set_sync_status(kind, id, status);
        self.dirty |= found;
        Ok(found)
    }

    fn insert_mutation(&mut self, mutation: PendingMutation) -> StoreResult<u64> {
        let sequence = self.shared.data.write().insert_mutation(mutation)?;
        self.dirty = true;
        Ok(sequence)
    }

    fn fetch_mutations(&self) -> StoreResult<Vec<PendingMutation>> {
        Ok(self.shared.data.read().fetch_mutations())
    }

    fn update_mutation(&mut self, mutation: &PendingMutation) -> StoreResult<()> {
        self.shared.data.write().update_mutation(mutation)?;
        self.dirty = true;
        Ok(())
    }

    fn delete_mutation(&mut self, key: ClientRequestId) -> StoreResult<bool> {
        let removed = self.shared.data.write().delete_mutation(key);
        self.dirty |= removed;
        Ok(removed)
    }

    fn has_pending_for(
        &self,
        entity_id: EntityId,
        operation: MutationOperation,
    ) -> StoreResult<bool> {
        Ok(self
            .shared
            .data
            .read()
            .has_pending_for(entity_id, operation))
    }

    fn commit(&mut self) -> StoreResult<()> {
        if !self.dirty {
            return Ok(());
        }
        let _guard = self.shared.write_lock.lock();
        let bytes = {
            let data = self.shared.data.read();
            serde_json::to_vec(&data.to_document()?)?
        };
        write_atomically(&self.shared.path, STORE_FILE, &bytes)?;
        self.dirty = false;
        Ok(())
    }
}

/// Replaces `dir/name` with `bytes` so a crash leaves either the old or the
/// new document, never a torn one.
///
/// 1. Write to `name.tmp`
/// 2. Sync the temporary file
/// 3. Rename over `name`
/// 4. Sync the directory so the rename is durable
pub(crate) fn write_atomically(dir: &Path, name: &str, bytes: &[u8]) -> StoreResult<()> {
    let target = dir.join(name);
    let temp = dir.join(format!("{name}.tmp"));

    let mut file = File::create(&temp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp, &target)?;
    sync_directory(dir)
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> StoreResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> StoreResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_protocol::Category;
    use serde_json::Value;
    use tempfile::tempdir;

    fn category(name: &str) -> Entity {
        Entity::Category(Category {
            id: EntityId::new(),
            name: name.into(),
            ..Default::default()
        })
    }

    #[test]
    fn committed_writes_survive_reopen() {
        let temp = tempdir().unwrap();
        let entity = category("Home");
        let id = entity.id();

        {
            let factory = FileStoreFactory::open_dir(temp.path()).unwrap();
            let mut store = factory.open().unwrap();
            store.insert(entity).unwrap();
            store.set_sync_status(EntityKind::Category, id, SyncStatus::Synced).unwrap();
            store.commit().unwrap();
        }

        let factory = FileStoreFactory::open_dir(temp.path()).unwrap();
        let store = factory.open().unwrap();
        let found = store.find(EntityKind::Category, id).unwrap().unwrap();
        assert_eq!(found.sync_status(), SyncStatus::Synced);
    }

    #[test]
    fn uncommitted_writes_are_lost_on_crash() {
        let temp = tempdir().unwrap();
        let kept = category("Kept");
        let lost = category("Lost");
        let (kept_id, lost_id) = (kept.id(), lost.id());

        {
            let factory = FileStoreFactory::open_dir(temp.path()).unwrap();
            let mut store = factory.open().unwrap();
            store.insert(kept).unwrap();
            store.commit().unwrap();
            store.insert(lost).unwrap();
            // dropped without commit
        }

        let factory = FileStoreFactory::open_dir(temp.path()).unwrap();
        let store = factory.open().unwrap();
        assert!(store.find(EntityKind::Category, kept_id).unwrap().is_some());
        assert!(store.find(EntityKind::Category, lost_id).unwrap().is_none());
    }

    #[test]
    fn queue_survives_reopen() {
        let temp = tempdir().unwrap();
        let id = EntityId::new();

        {
            let factory = FileStoreFactory::open_dir(temp.path()).unwrap();
            let mut store = factory.open().unwrap();
            store
                .insert_mutation(PendingMutation::new(
                    EntityKind::Event,
                    MutationOperation::Create,
                    id,
                    Value::Null,
                    7,
                ))
                .unwrap();
            store.commit().unwrap();
        }

        let factory = FileStoreFactory::open_dir(temp.path()).unwrap();
        let mut store = factory.open().unwrap();
        assert!(store.has_pending_for(id, MutationOperation::Create).unwrap());

        // Sequence numbering continues after a reopen
        let next = store
            .insert_mutation(PendingMutation::new(
                EntityKind::Event,
                MutationOperation::Update,
                id,
                Value::Null,
                8,
            ))
            .unwrap();
        assert_eq!(next, 2);
    }

    #[test]
    fn second_factory_is_locked_out() {
        let temp = tempdir().unwrap();
        let _first = FileStoreFactory::open_dir(temp.path()).unwrap();
        let second = FileStoreFactory::open_dir(temp.path());
        assert!(matches!(second, Err(StoreError::Locked(_))));
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let temp = tempdir().unwrap();
        write_atomically(temp.path(), "doc.json", b"{}").unwrap();
        assert!(temp.path().join("doc.json").exists());
        assert!(!temp.path().join("doc.json.tmp").exists());
    }
}
