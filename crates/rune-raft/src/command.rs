//! Consensus command codec.
//!
//! Commands are the only thing that travels through the log. The encoding is
//! self-describing JSON tagged by `op`; the set of ops may only ever grow,
//! and a node that encounters an op it does not recognize must halt rather
//! than skip the entry.

use serde::{Deserialize, Serialize};

use crate::error::RaftError;

/// A replicated mutation command.
///
/// Applying the same command twice yields the same store state: `set` with
/// identical value and `delete` are both idempotent, which makes retries
/// after an unknown-outcome timeout safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Command {
    /// Store `value` at `key`, overwriting any existing value.
    Set { key: String, value: Vec<u8> },
    /// Remove `key`. Deleting a missing key succeeds.
    Delete { key: String },
}

impl Command {
    /// Encode for appending to the log.
    ///
    /// # Errors
    ///
    /// Returns [`RaftError::Codec`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, RaftError> {
        serde_json::to_vec(self).map_err(|e| RaftError::Codec {
            reason: e.to_string(),
        })
    }

    /// Decode a committed log entry.
    ///
    /// An unrecognized `op` fails here; the caller treats that as fatal.
    ///
    /// # Errors
    ///
    /// Returns [`RaftError::Codec`] if the entry is malformed or carries an
    /// unknown op.
    pub fn decode(bytes: &[u8]) -> Result<Self, RaftError> {
        serde_json::from_slice(bytes).map_err(|e| RaftError::Codec {
            reason: e.to_string(),
        })
    }
}
