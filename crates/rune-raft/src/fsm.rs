//! Deterministic state machine over the secret store.
//!
//! The FSM is a pure function of current store state and command: no
//! external side effects, no time-based decisions. Consensus may replay
//! committed entries during recovery, so every apply must be idempotent.

use std::io::{Read, Write};
use std::sync::Arc;

use rune_storage::VaultStore;

use crate::command::Command;
use crate::error::RaftError;

/// Applies committed log entries to the backing store and serves the
/// snapshot/restore surface used for log compaction and node catch-up.
#[derive(Clone)]
pub struct Fsm {
    store: Arc<dyn VaultStore>,
}

impl Fsm {
    /// Create an FSM over the given store.
    pub fn new(store: Arc<dyn VaultStore>) -> Self {
        Self { store }
    }

    /// Apply one committed log entry.
    ///
    /// # Errors
    ///
    /// Returns [`RaftError::Apply`] if the entry cannot be decoded (unknown
    /// op) or the store mutation fails. Both are fatal to the node: a state
    /// machine that has diverged from the log must not continue.
    pub async fn apply(&self, entry: &[u8]) -> Result<(), RaftError> {
        let command = Command::decode(entry).map_err(|e| RaftError::Apply {
            reason: format!("unrecognized committed entry: {e}"),
        })?;

        match command {
            Command::Set { key, value } => {
                self.store
                    .put(&key, &value)
                    .await
                    .map_err(|e| RaftError::Apply {
                        reason: e.to_string(),
                    })
            }
            Command::Delete { key } => {
                self.store
                    .delete(&key)
                    .await
                    .map_err(|e| RaftError::Apply {
                        reason: e.to_string(),
                    })
            }
        }
    }

    /// Stream a consistent point-in-time image of the store to `sink`.
    ///
    /// The caller owns the sink lifecycle; on error it must discard
    /// (cancel) whatever was written.
    ///
    /// # Errors
    ///
    /// Returns [`RaftError::Snapshot`] if the store cannot be read or the
    /// sink cannot be written.
    pub fn snapshot(&self, sink: &mut dyn Write) -> Result<(), RaftError> {
        self.store
            .snapshot(sink)
            .map_err(|e| RaftError::Snapshot {
                reason: e.to_string(),
            })
    }

    /// Replace local store state with a snapshot image.
    ///
    /// # Errors
    ///
    /// Returns [`RaftError::Restore`] if the image is malformed or the
    /// store cannot be rebuilt.
    pub fn restore(&self, reader: &mut dyn Read) -> Result<(), RaftError> {
        self.store
            .restore(reader)
            .map_err(|e| RaftError::Restore {
                reason: e.to_string(),
            })
    }
}

impl std::fmt::Debug for Fsm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fsm").finish_non_exhaustive()
    }
}
