//! Server configuration for Rune.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `RUNE_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Directory holding the secret store and consensus data.
    pub data_dir: PathBuf,
    /// Storage backend type.
    pub storage_backend: StorageBackendType,
    /// Number of key shares to generate at initialization.
    pub key_shares: u8,
    /// Shares required to reconstruct the master key.
    pub key_threshold: u8,
    /// Whether writes route through the consensus log.
    pub replication: ReplicationMode,
    /// Stable identifier of this node in a replicated deployment.
    pub node_id: String,
    /// Log level filter (e.g. `info`, `debug`).
    pub log_level: String,
    /// Whether to submit the freshly generated shares at startup so the
    /// server comes up unsealed. Disable for operator-driven unsealing.
    pub auto_unseal: bool,
}

/// Supported storage backend types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// Embedded redb file under the data directory.
    Redb,
}

/// Write-path replication modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationMode {
    /// Writes go directly to the local store.
    None,
    /// Writes are sequenced through the consensus log.
    Raft,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `RUNE_BIND_ADDR` — bind address (default: `127.0.0.1:8200`)
    /// - `RUNE_DATA_DIR` — data directory (default: `./data`)
    /// - `RUNE_STORAGE` — `redb` or `memory` (default: `redb`)
    /// - `RUNE_KEY_SHARES` — shares to generate (default: `5`)
    /// - `RUNE_KEY_THRESHOLD` — shares required to unseal (default: `3`)
    /// - `RUNE_REPLICATION` — `raft` or `none` (default: `raft`)
    /// - `RUNE_NODE_ID` — node identifier (default: `node-1`)
    /// - `RUNE_LOG_LEVEL` — log filter (default: `info`)
    /// - `RUNE_AUTO_UNSEAL` — unseal with the generated shares at startup
    ///   (default: `true`)
    #[must_use]
    pub fn from_env() -> Self {
        let bind_addr = std::env::var("RUNE_BIND_ADDR")
            .ok()
            .and_then(|addr| addr.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8200)));

        let data_dir = std::env::var("RUNE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let storage_backend = match std::env::var("RUNE_STORAGE")
            .unwrap_or_else(|_| "redb".to_owned())
            .to_lowercase()
            .as_str()
        {
            "memory" => StorageBackendType::Memory,
            _ => StorageBackendType::Redb,
        };

        let key_shares = std::env::var("RUNE_KEY_SHARES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        let key_threshold = std::env::var("RUNE_KEY_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        let replication = match std::env::var("RUNE_REPLICATION")
            .unwrap_or_else(|_| "raft".to_owned())
            .to_lowercase()
            .as_str()
        {
            "none" => ReplicationMode::None,
            _ => ReplicationMode::Raft,
        };

        let node_id = std::env::var("RUNE_NODE_ID").unwrap_or_else(|_| "node-1".to_owned());

        let log_level = std::env::var("RUNE_LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());

        let auto_unseal = std::env::var("RUNE_AUTO_UNSEAL")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        Self {
            bind_addr,
            data_dir,
            storage_backend,
            key_shares,
            key_threshold,
            replication,
            node_id,
            log_level,
            auto_unseal,
        }
    }
}
