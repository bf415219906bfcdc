//! Embedded redb storage backend.
//!
//! A single-file B-tree store holding one table of key-value data. All
//! operations are transactional: readers proceed in parallel, writers
//! serialize, and a failed mutation leaves the file in its pre-mutation
//! state.
//!
//! Beyond the key-value contract, `RedbStore` implements [`StoreImage`]:
//! `snapshot` streams a consistent image under one read transaction, and
//! `restore` rebuilds a fresh database file from an image and atomically
//! renames it over the live one.

use std::fmt;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use redb::{Database, ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};

use crate::image::{read_image, write_image, StoreImage};
use crate::{StorageBackend, StorageError};

/// Every secret lives in this one table; path hierarchy is encoded in the
/// keys themselves.
const DATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("rune_data");

/// A storage backend backed by redb.
///
/// The database handle lives behind `RwLock<Option<_>>`: `restore` takes the
/// write side to swap the file out from under readers, and `close` replaces
/// the handle with `None` so every later operation reports
/// [`StorageError::Closed`] instead of touching a dead file. Key-value calls
/// run on the Tokio blocking pool; redb itself is synchronous.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<RwLock<Option<Database>>>,
    path: PathBuf,
}

impl fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = self.db.read().map(|guard| guard.is_some()).unwrap_or(false);
        f.debug_struct("RedbStore")
            .field("path", &self.path)
            .field("open", &open)
            .finish()
    }
}

impl RedbStore {
    /// Open or create a redb database at the given path.
    ///
    /// Idempotently ensures the data table exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if redb fails to open or create the
    /// database file, or [`StorageError::Transaction`] if the initial table
    /// setup fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let db = open_database(&path)?;
        Ok(Self {
            db: Arc::new(RwLock::new(Some(db))),
            path,
        })
    }

    /// Filesystem location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the store, releasing the file lock.
    ///
    /// After close, all operations fail with [`StorageError::Closed`].
    pub fn close(&self) {
        if let Ok(mut guard) = self.db.write() {
            *guard = None;
        }
    }

    /// Hand `f` the live database, or fail if the store has been closed.
    /// Synchronous; the async paths go through [`Self::with_open_db`].
    fn with_live_db<T>(
        &self,
        f: impl FnOnce(&Database) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let guard = self.db.read().map_err(|e| txn_failed(&e))?;
        guard.as_ref().map_or(Err(StorageError::Closed), f)
    }

    /// Like [`Self::with_live_db`], but on the blocking thread pool.
    async fn with_open_db<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let handle = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let guard = handle.read().map_err(|e| txn_failed(&e))?;
            guard.as_ref().map_or(Err(StorageError::Closed), f)
        })
        .await
        .unwrap_or_else(|join| Err(txn_failed(&join)))
    }

    /// Run a read-only operation inside one read transaction.
    async fn read_op<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&ReadTransaction) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        self.with_open_db(move |db| {
            let txn = db.begin_read().map_err(|e| txn_failed(&e))?;
            f(&txn)
        })
        .await
    }

    /// Run a mutation inside one write transaction, committing only when
    /// `f` succeeds. A failed mutation never reaches the file.
    async fn write_op<F>(&self, f: F) -> Result<(), StorageError>
    where
        F: FnOnce(&WriteTransaction) -> Result<(), StorageError> + Send + 'static,
    {
        self.with_open_db(move |db| {
            let txn = db.begin_write().map_err(|e| txn_failed(&e))?;
            f(&txn)?;
            txn.commit().map_err(|e| txn_failed(&e))
        })
        .await
    }
}

/// Open a redb file and make sure the data table is present.
fn open_database(path: &Path) -> Result<Database, StorageError> {
    let db = Database::create(path).map_err(|e| StorageError::Open {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    // Creating the table up front means no later open_table can fail on a
    // fresh file. The unnamed table handle drops before the commit.
    let setup = db.begin_write().map_err(|e| txn_failed(&e))?;
    setup.open_table(DATA_TABLE).map_err(|e| no_table(&e))?;
    setup.commit().map_err(|e| txn_failed(&e))?;

    Ok(db)
}

fn txn_failed(e: &dyn fmt::Display) -> StorageError {
    StorageError::Transaction {
        reason: e.to_string(),
    }
}

fn no_table(e: &dyn fmt::Display) -> StorageError {
    StorageError::MissingTable {
        name: format!("rune_data ({e})"),
    }
}

#[async_trait::async_trait]
impl StorageBackend for RedbStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let key = key.to_owned();
        self.read_op(move |txn| {
            let table = txn.open_table(DATA_TABLE).map_err(|e| no_table(&e))?;
            let hit = table.get(key.as_str()).map_err(|e| StorageError::Read {
                key: key.clone(),
                reason: e.to_string(),
            })?;
            Ok(hit.map(|value| value.value().to_vec()))
        })
        .await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let key = key.to_owned();
        let value = value.to_vec();
        self.write_op(move |txn| {
            let mut table = txn.open_table(DATA_TABLE).map_err(|e| no_table(&e))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map(|_previous| ())
                .map_err(|e| StorageError::Write {
                    key: key.clone(),
                    reason: e.to_string(),
                })
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let key = key.to_owned();
        self.write_op(move |txn| {
            let mut table = txn.open_table(DATA_TABLE).map_err(|e| no_table(&e))?;
            // An absent key comes back as Ok(None), which is what makes
            // delete idempotent.
            table
                .remove(key.as_str())
                .map(|_previous| ())
                .map_err(|e| StorageError::Delete {
                    key: key.clone(),
                    reason: e.to_string(),
                })
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let prefix = prefix.to_owned();
        self.read_op(move |txn| {
            let fail = |reason: String| StorageError::List {
                prefix: prefix.clone(),
                reason,
            };

            let table = txn.open_table(DATA_TABLE).map_err(|e| no_table(&e))?;
            let scan = table
                .range(prefix.as_str()..)
                .map_err(|e| fail(e.to_string()))?;

            // The B-tree hands keys back in order, so matches form one
            // contiguous run starting at the prefix.
            let mut matches = Vec::new();
            for entry in scan {
                let (found, _) = entry.map_err(|e| fail(e.to_string()))?;
                match found.value() {
                    path if path.starts_with(prefix.as_str()) => matches.push(path.to_owned()),
                    _ => break,
                }
            }
            Ok(matches)
        })
        .await
    }
}

impl StoreImage for RedbStore {
    fn snapshot(&self, w: &mut dyn Write) -> Result<(), StorageError> {
        let fail = |reason: String| StorageError::Snapshot { reason };

        self.with_live_db(|db| {
            let txn = db.begin_read().map_err(|e| fail(e.to_string()))?;
            let table = txn.open_table(DATA_TABLE).map_err(|e| fail(e.to_string()))?;
            // One read transaction spans the full copy; writers that commit
            // while this runs are not observed.
            let iter = table.iter().map_err(|e| fail(e.to_string()))?;
            for item in iter {
                let (k, v) = item.map_err(|e| fail(e.to_string()))?;
                write_image(w, k.value(), v.value()).map_err(|e| fail(e.to_string()))?;
            }
            Ok(())
        })
    }

    fn restore(&self, r: &mut dyn Read) -> Result<(), StorageError> {
        // Parse the full image before touching any file.
        let entries = read_image(r)?;

        // Build the replacement database beside the live one.
        let staging = self.path.with_extension("restore");
        let _ = fs::remove_file(&staging);
        {
            let db = Database::create(&staging).map_err(|e| StorageError::Restore {
                reason: format!("failed to create staging database: {e}"),
            })?;
            let txn = db.begin_write().map_err(|e| StorageError::Restore {
                reason: e.to_string(),
            })?;
            {
                let mut table = txn
                    .open_table(DATA_TABLE)
                    .map_err(|e| StorageError::Restore {
                        reason: e.to_string(),
                    })?;
                for (key, value) in &entries {
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(|e| StorageError::Restore {
                            reason: e.to_string(),
                        })?;
                }
            }
            txn.commit().map_err(|e| StorageError::Restore {
                reason: e.to_string(),
            })?;
        }

        // Exclusive access: all other operations block until the swap is
        // done, and prior read handles die with the old Database.
        let mut guard = self.db.write().map_err(|e| StorageError::Restore {
            reason: e.to_string(),
        })?;
        if guard.is_none() {
            let _ = fs::remove_file(&staging);
            return Err(StorageError::Closed);
        }
        *guard = None; // drop the old handle, releasing the file lock

        fs::rename(&staging, &self.path).map_err(|e| StorageError::Restore {
            reason: format!("failed to replace database file: {e}"),
        })?;

        let db = open_database(&self.path)?;
        *guard = Some(db);
        Ok(())
    }
}
