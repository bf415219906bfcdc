//! Durable log and stable metadata stores.
//!
//! Two small redb databases under the node's data directory:
//!
//! - `raft-log.redb` — the command log, keyed by index. Entries below the
//!   last snapshot point are truncated at compaction.
//! - `raft-stable.redb` — metadata that must survive restarts: current
//!   term, voted-for, last applied index, last snapshot index.
//!
//! All methods are blocking; async callers run them on the blocking thread
//! pool.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};

use crate::error::RaftError;

const LOG_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("raft_log");
const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("raft_meta");

/// The durable, index-ordered command log.
#[derive(Clone)]
pub struct LogStore {
    db: Arc<Database>,
}

impl LogStore {
    /// Open or create the log database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RaftError::Log`] if the file cannot be opened or the table
    /// cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RaftError> {
        let db = Database::create(path.as_ref()).map_err(|e| RaftError::Log {
            reason: format!("failed to open log store: {e}"),
        })?;
        let txn = db.begin_write().map_err(log_err)?;
        {
            let _table = txn.open_table(LOG_TABLE).map_err(log_err)?;
        }
        txn.commit().map_err(log_err)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Append an entry at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`RaftError::Log`] on any storage failure.
    pub fn append(&self, index: u64, entry: &[u8]) -> Result<(), RaftError> {
        let txn = self.db.begin_write().map_err(log_err)?;
        {
            let mut table = txn.open_table(LOG_TABLE).map_err(log_err)?;
            table.insert(index, entry).map_err(log_err)?;
        }
        txn.commit().map_err(log_err)
    }

    /// Index of the last entry in the log, or `None` if empty.
    ///
    /// # Errors
    ///
    /// Returns [`RaftError::Log`] on any storage failure.
    pub fn last_index(&self) -> Result<Option<u64>, RaftError> {
        let txn = self.db.begin_read().map_err(log_err)?;
        let table = txn.open_table(LOG_TABLE).map_err(log_err)?;
        let last = table.last().map_err(log_err)?;
        Ok(last.map(|(k, _)| k.value()))
    }

    /// Number of entries currently in the log.
    ///
    /// # Errors
    ///
    /// Returns [`RaftError::Log`] on any storage failure.
    pub fn len(&self) -> Result<u64, RaftError> {
        let txn = self.db.begin_read().map_err(log_err)?;
        let table = txn.open_table(LOG_TABLE).map_err(log_err)?;
        table.len().map_err(log_err)
    }

    /// Whether the log holds no entries.
    ///
    /// # Errors
    ///
    /// Returns [`RaftError::Log`] on any storage failure.
    pub fn is_empty(&self) -> Result<bool, RaftError> {
        Ok(self.len()? == 0)
    }

    /// All entries with index strictly greater than `index`, ascending.
    ///
    /// # Errors
    ///
    /// Returns [`RaftError::Log`] on any storage failure.
    pub fn entries_after(&self, index: u64) -> Result<Vec<(u64, Vec<u8>)>, RaftError> {
        let txn = self.db.begin_read().map_err(log_err)?;
        let table = txn.open_table(LOG_TABLE).map_err(log_err)?;
        let mut entries = Vec::new();
        let start = index.saturating_add(1);
        for item in table.range(start..).map_err(log_err)? {
            let (k, v) = item.map_err(log_err)?;
            entries.push((k.value(), v.value().to_vec()));
        }
        Ok(entries)
    }

    /// Remove all entries with index less than or equal to `index`.
    ///
    /// Called after a snapshot has made the prefix redundant.
    ///
    /// # Errors
    ///
    /// Returns [`RaftError::Log`] on any storage failure.
    pub fn truncate_through(&self, index: u64) -> Result<(), RaftError> {
        let txn = self.db.begin_write().map_err(log_err)?;
        {
            let mut table = txn.open_table(LOG_TABLE).map_err(log_err)?;
            let stale: Vec<u64> = {
                let range = table.range(..=index).map_err(log_err)?;
                range
                    .map(|item| item.map(|(k, _)| k.value()).map_err(log_err))
                    .collect::<Result<_, _>>()?
            };
            for key in stale {
                table.remove(key).map_err(log_err)?;
            }
        }
        txn.commit().map_err(log_err)
    }
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore").finish_non_exhaustive()
    }
}

/// Stable metadata that must survive restarts.
#[derive(Clone)]
pub struct StableStore {
    db: Arc<Database>,
}

impl StableStore {
    /// Open or create the stable store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RaftError::Stable`] if the file cannot be opened or the
    /// table cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RaftError> {
        let db = Database::create(path.as_ref()).map_err(|e| RaftError::Stable {
            reason: format!("failed to open stable store: {e}"),
        })?;
        let txn = db.begin_write().map_err(stable_err)?;
        {
            let _table = txn.open_table(META_TABLE).map_err(stable_err)?;
        }
        txn.commit().map_err(stable_err)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Read a u64 value, defaulting to 0 when unset.
    ///
    /// # Errors
    ///
    /// Returns [`RaftError::Stable`] on any storage failure.
    pub fn get_u64(&self, key: &str) -> Result<u64, RaftError> {
        let txn = self.db.begin_read().map_err(stable_err)?;
        let table = txn.open_table(META_TABLE).map_err(stable_err)?;
        let value = table.get(key).map_err(stable_err)?;
        match value {
            Some(guard) => {
                let bytes: [u8; 8] =
                    guard
                        .value()
                        .try_into()
                        .map_err(|_| RaftError::Stable {
                            reason: format!("metadata key '{key}' is not a u64"),
                        })?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    /// Write a u64 value.
    ///
    /// # Errors
    ///
    /// Returns [`RaftError::Stable`] on any storage failure.
    pub fn set_u64(&self, key: &str, value: u64) -> Result<(), RaftError> {
        let txn = self.db.begin_write().map_err(stable_err)?;
        {
            let mut table = txn.open_table(META_TABLE).map_err(stable_err)?;
            table
                .insert(key, value.to_be_bytes().as_slice())
                .map_err(stable_err)?;
        }
        txn.commit().map_err(stable_err)
    }

    /// Read a string value, if set.
    ///
    /// # Errors
    ///
    /// Returns [`RaftError::Stable`] on any storage failure.
    pub fn get_string(&self, key: &str) -> Result<Option<String>, RaftError> {
        let txn = self.db.begin_read().map_err(stable_err)?;
        let table = txn.open_table(META_TABLE).map_err(stable_err)?;
        let value = table.get(key).map_err(stable_err)?;
        match value {
            Some(guard) => {
                let s = String::from_utf8(guard.value().to_vec()).map_err(|e| {
                    RaftError::Stable {
                        reason: format!("metadata key '{key}' is not UTF-8: {e}"),
                    }
                })?;
                Ok(Some(s))
            }
            None => Ok(None),
        }
    }

    /// Write a string value.
    ///
    /// # Errors
    ///
    /// Returns [`RaftError::Stable`] on any storage failure.
    pub fn set_string(&self, key: &str, value: &str) -> Result<(), RaftError> {
        let txn = self.db.begin_write().map_err(stable_err)?;
        {
            let mut table = txn.open_table(META_TABLE).map_err(stable_err)?;
            table.insert(key, value.as_bytes()).map_err(stable_err)?;
        }
        txn.commit().map_err(stable_err)
    }
}

impl std::fmt::Debug for StableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StableStore").finish_non_exhaustive()
    }
}

fn log_err(e: impl std::fmt::Display) -> RaftError {
    RaftError::Log {
        reason: e.to_string(),
    }
}

fn stable_err(e: impl std::fmt::Display) -> RaftError {
    RaftError::Stable {
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = LogStore::open(dir.path().join("raft-log.redb")).unwrap();

        assert!(log.is_empty().unwrap());
        assert_eq!(log.last_index().unwrap(), None);

        log.append(1, b"one").unwrap();
        log.append(2, b"two").unwrap();
        log.append(3, b"three").unwrap();

        assert_eq!(log.last_index().unwrap(), Some(3));
        assert_eq!(log.len().unwrap(), 3);

        let entries = log.entries_after(1).unwrap();
        assert_eq!(
            entries,
            vec![(2, b"two".to_vec()), (3, b"three".to_vec())]
        );
    }

    #[test]
    fn log_truncate_removes_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let log = LogStore::open(dir.path().join("raft-log.redb")).unwrap();

        for i in 1..=5 {
            log.append(i, format!("entry-{i}").as_bytes()).unwrap();
        }
        log.truncate_through(3).unwrap();

        assert_eq!(log.len().unwrap(), 2);
        let entries = log.entries_after(0).unwrap();
        assert_eq!(entries[0].0, 4);
        assert_eq!(entries[1].0, 5);
    }

    #[test]
    fn log_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raft-log.redb");
        {
            let log = LogStore::open(&path).unwrap();
            log.append(1, b"durable").unwrap();
        }
        let log = LogStore::open(&path).unwrap();
        assert_eq!(log.last_index().unwrap(), Some(1));
    }

    #[test]
    fn stable_u64_defaults_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let stable = StableStore::open(dir.path().join("raft-stable.redb")).unwrap();
        assert_eq!(stable.get_u64("last_applied").unwrap(), 0);

        stable.set_u64("last_applied", 42).unwrap();
        assert_eq!(stable.get_u64("last_applied").unwrap(), 42);
    }

    #[test]
    fn stable_string_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let stable = StableStore::open(dir.path().join("raft-stable.redb")).unwrap();
        assert_eq!(stable.get_string("voted_for").unwrap(), None);

        stable.set_string("voted_for", "node-1").unwrap();
        assert_eq!(
            stable.get_string("voted_for").unwrap(),
            Some("node-1".to_owned())
        );
    }
}
