//! Volatile storage for tests.
//!
//! Entries live in a sorted map guarded by a lock, so prefix scans come out
//! ordered without any index. Nothing touches disk; every test gets a
//! throwaway store and loses it on drop.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::image::{read_image, write_image, StoreImage};
use crate::{StorageBackend, StorageError};

type EntryMap = BTreeMap<String, Vec<u8>>;

/// An in-memory backend over a `BTreeMap`.
///
/// Clones share the underlying map, which lets a test hold one handle while
/// the code under test holds another. The lock is never held across an
/// await point, so a plain `std::sync::RwLock` does the job.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<RwLock<EntryMap>>,
}

impl MemoryBackend {
    /// Create a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the map for reading. Poisoning only happens if a writer
    /// panicked mid-mutation, which counts as a failed transaction.
    fn read(&self) -> Result<RwLockReadGuard<'_, EntryMap>, StorageError> {
        self.entries
            .read()
            .map_err(|e| StorageError::Transaction {
                reason: format!("lock poisoned: {e}"),
            })
    }

    /// Acquire the map for writing.
    fn write(&self) -> Result<RwLockWriteGuard<'_, EntryMap>, StorageError> {
        self.entries
            .write()
            .map_err(|e| StorageError::Transaction {
                reason: format!("lock poisoned: {e}"),
            })
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.read()?.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.write()?.insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.write()?.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let entries = self.read()?;
        let matches = entries
            .range(prefix.to_owned()..)
            .map(|(path, _)| path)
            .take_while(|path| path.starts_with(prefix))
            .cloned()
            .collect();
        Ok(matches)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.read()?.contains_key(key))
    }
}

impl StoreImage for MemoryBackend {
    fn snapshot(&self, w: &mut dyn Write) -> Result<(), StorageError> {
        let entries = self.read().map_err(|e| StorageError::Snapshot {
            reason: e.to_string(),
        })?;
        for (path, value) in entries.iter() {
            write_image(w, path, value).map_err(|e| StorageError::Snapshot {
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn restore(&self, r: &mut dyn Read) -> Result<(), StorageError> {
        let incoming = read_image(r)?;
        let mut entries = self.write().map_err(|e| StorageError::Restore {
            reason: e.to_string(),
        })?;
        *entries = incoming.into_iter().collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_key_reads_as_none() {
        let backend = MemoryBackend::new();
        assert!(backend.get("kv/never/written").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn latest_write_wins() {
        let backend = MemoryBackend::new();
        backend.put("kv/app/token", b"first").await.unwrap();
        assert_eq!(
            backend.get("kv/app/token").await.unwrap().as_deref(),
            Some(b"first".as_slice())
        );

        backend.put("kv/app/token", b"second").await.unwrap();
        assert_eq!(
            backend.get("kv/app/token").await.unwrap().as_deref(),
            Some(b"second".as_slice())
        );
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let backend = MemoryBackend::new();
        backend.put("kv/app/cert", b"pem bytes").await.unwrap();

        // First delete removes the entry, the second finds nothing, and
        // neither is an error.
        backend.delete("kv/app/cert").await.unwrap();
        assert!(backend.get("kv/app/cert").await.unwrap().is_none());
        backend.delete("kv/app/cert").await.unwrap();
    }

    #[tokio::test]
    async fn listing_respects_prefix_and_order() {
        let backend = MemoryBackend::new();
        // Inserted out of order; sibling prefixes must not leak in.
        for path in ["kv/db/user", "kv/api/key", "kv/db/pass", "kv/db2/host"] {
            backend.put(path, b"x").await.unwrap();
        }

        let under_db = backend.list("kv/db/").await.unwrap();
        assert_eq!(under_db, ["kv/db/pass", "kv/db/user"]);

        // An empty prefix walks the whole map, still ordered.
        let everything = backend.list("").await.unwrap();
        assert_eq!(
            everything,
            ["kv/api/key", "kv/db/pass", "kv/db/user", "kv/db2/host"]
        );

        // A prefix with no matches yields an empty set, not an error.
        assert!(backend.list("pki/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn exists_tracks_insert_and_delete() {
        let backend = MemoryBackend::new();
        assert!(!backend.exists("kv/flag").await.unwrap());

        backend.put("kv/flag", b"on").await.unwrap();
        assert!(backend.exists("kv/flag").await.unwrap());

        backend.delete("kv/flag").await.unwrap();
        assert!(!backend.exists("kv/flag").await.unwrap());
    }

    #[tokio::test]
    async fn clones_share_one_map() {
        let backend = MemoryBackend::new();
        let handle = backend.clone();

        // Written through the clone, visible through the original.
        handle.put("kv/shared", b"both see this").await.unwrap();
        assert_eq!(
            backend.get("kv/shared").await.unwrap(),
            Some(b"both see this".to_vec())
        );
    }

    #[tokio::test]
    async fn empty_value_is_a_real_entry() {
        let backend = MemoryBackend::new();
        backend.put("kv/empty", b"").await.unwrap();
        assert_eq!(backend.get("kv/empty").await.unwrap(), Some(Vec::new()));
        assert!(backend.exists("kv/empty").await.unwrap());
    }

    #[tokio::test]
    async fn restore_replaces_contents_wholesale() {
        let source = MemoryBackend::new();
        source.put("kv/a", b"1").await.unwrap();
        source.put("kv/b", b"2").await.unwrap();

        let mut image = Vec::new();
        source.snapshot(&mut image).unwrap();

        let target = MemoryBackend::new();
        target.put("kv/stale", b"must not survive").await.unwrap();
        target.restore(&mut image.as_slice()).unwrap();

        assert_eq!(target.list("").await.unwrap(), ["kv/a", "kv/b"]);
        assert_eq!(target.get("kv/a").await.unwrap(), Some(b"1".to_vec()));
        assert!(target.get("kv/stale").await.unwrap().is_none());
    }
}
