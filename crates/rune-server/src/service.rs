//! The vault service facade.
//!
//! Every data-plane operation gates on seal state, runs envelope crypto
//! inside the process boundary, and maps internal failures to a small set
//! of coarse statuses. Plaintext values and DEKs exist only within a single
//! call; they are never logged and never reach storage or the log.
//!
//! Reads are served from the local store. Writes route through the
//! consensus log when replication is enabled, directly to the store
//! otherwise.

use std::sync::Arc;

use rune_core::{EnvelopeEngine, Seal};
use rune_raft::{Command, RaftNode};
use rune_storage::VaultStore;
use tokio::sync::RwLock;
use tracing::warn;

/// Coarse operation statuses surfaced to clients.
///
/// Internal detail (crypto failures, storage paths, log errors) is
/// deliberately collapsed: clients learn only that the vault is sealed, the
/// secret is absent, or something internal went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VaultError {
    /// The vault is sealed; no data-plane operations are possible.
    #[error("vault is sealed")]
    Sealed,

    /// No secret exists at the requested path.
    #[error("secret not found")]
    NotFound,

    /// An internal crypto, storage, or consensus failure. Opaque to the
    /// client.
    #[error("internal error")]
    Internal,
}

/// The service facade over seal, crypto, store, and consensus log.
pub struct VaultService {
    seal: Arc<Seal>,
    store: Arc<dyn VaultStore>,
    raft: Option<Arc<RaftNode>>,
    /// Built from the master key on first use after unseal.
    engine: RwLock<Option<Arc<EnvelopeEngine>>>,
}

impl VaultService {
    /// Create the facade. With `raft` set, mutations are sequenced through
    /// the consensus log; otherwise they hit the store directly.
    pub fn new(
        seal: Arc<Seal>,
        store: Arc<dyn VaultStore>,
        raft: Option<Arc<RaftNode>>,
    ) -> Self {
        Self {
            seal,
            store,
            raft,
            engine: RwLock::new(None),
        }
    }

    /// Encrypt and store a value at `path`.
    ///
    /// # Errors
    ///
    /// [`VaultError::Sealed`] while sealed; [`VaultError::Internal`] on any
    /// crypto, storage, or log failure.
    pub async fn put(&self, path: &str, value: &[u8]) -> Result<(), VaultError> {
        let engine = self.engine().await?;

        let blob = engine.encrypt(value).map_err(|e| {
            warn!(error = %e, "failed to encrypt secret");
            VaultError::Internal
        })?;

        match &self.raft {
            Some(node) => {
                node.submit(&Command::Set {
                    key: path.to_owned(),
                    value: blob,
                })
                .await
                .map(|_| ())
                .map_err(|e| {
                    warn!(error = %e, "failed to commit secret write");
                    VaultError::Internal
                })
            }
            None => self.store.put(path, &blob).await.map_err(|e| {
                warn!(error = %e, "failed to store secret");
                VaultError::Internal
            }),
        }
    }

    /// Fetch and decrypt the value at `path`.
    ///
    /// # Errors
    ///
    /// [`VaultError::Sealed`] while sealed; [`VaultError::NotFound`] for an
    /// unknown path; [`VaultError::Internal`] on any crypto or storage
    /// failure.
    pub async fn get(&self, path: &str) -> Result<Vec<u8>, VaultError> {
        let engine = self.engine().await?;

        let blob = self
            .store
            .get(path)
            .await
            .map_err(|e| {
                warn!(error = %e, "failed to read secret");
                VaultError::Internal
            })?
            .ok_or(VaultError::NotFound)?;

        engine.decrypt(&blob).map_err(|e| {
            warn!(error = %e, "failed to decrypt secret");
            VaultError::Internal
        })
    }

    /// Remove the value at `path`. Idempotent.
    ///
    /// # Errors
    ///
    /// [`VaultError::Sealed`] while sealed; [`VaultError::Internal`] on any
    /// storage or log failure.
    pub async fn delete(&self, path: &str) -> Result<(), VaultError> {
        let _engine = self.engine().await?;

        match &self.raft {
            Some(node) => node
                .submit(&Command::Delete {
                    key: path.to_owned(),
                })
                .await
                .map(|_| ())
                .map_err(|e| {
                    warn!(error = %e, "failed to commit secret delete");
                    VaultError::Internal
                }),
            None => self.store.delete(path).await.map_err(|e| {
                warn!(error = %e, "failed to delete secret");
                VaultError::Internal
            }),
        }
    }

    /// List stored paths under `prefix`, lexicographically ascending.
    ///
    /// Local read; returns paths only, never values.
    ///
    /// # Errors
    ///
    /// [`VaultError::Sealed`] while sealed; [`VaultError::Internal`] on any
    /// storage failure.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, VaultError> {
        let _engine = self.engine().await?;

        self.store.list(prefix).await.map_err(|e| {
            warn!(error = %e, "failed to list secrets");
            VaultError::Internal
        })
    }

    /// Gate on seal state and return the crypto engine, building it from
    /// the master key on first use after unseal.
    async fn engine(&self) -> Result<Arc<EnvelopeEngine>, VaultError> {
        if !self.seal.is_unsealed().await {
            return Err(VaultError::Sealed);
        }

        {
            let guard = self.engine.read().await;
            if let Some(engine) = guard.as_ref() {
                return Ok(Arc::clone(engine));
            }
        }

        let mut guard = self.engine.write().await;
        if let Some(engine) = guard.as_ref() {
            return Ok(Arc::clone(engine));
        }
        let master_key = self
            .seal
            .master_key()
            .await
            .map_err(|_| VaultError::Sealed)?;
        let engine = Arc::new(EnvelopeEngine::new(master_key));
        *guard = Some(Arc::clone(&engine));
        Ok(engine)
    }
}

impl std::fmt::Debug for VaultService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultService")
            .field("replicated", &self.raft.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rune_raft::RaftConfig;
    use rune_storage::{MemoryBackend, StorageBackend};

    use super::*;

    async fn unsealed_seal(shares: u8, threshold: u8) -> Arc<Seal> {
        let seal = Arc::new(Seal::new(shares, threshold).unwrap());
        let generated = seal.generate_keys().await.unwrap();
        for share in generated.iter().take(usize::from(threshold)) {
            seal.unseal(share).await.unwrap();
        }
        seal
    }

    fn local_service(seal: Arc<Seal>) -> (VaultService, Arc<MemoryBackend>) {
        let store = Arc::new(MemoryBackend::new());
        let service = VaultService::new(seal, Arc::clone(&store) as Arc<dyn VaultStore>, None);
        (service, store)
    }

    #[tokio::test]
    async fn sealed_vault_rejects_everything() {
        let seal = Arc::new(Seal::new(5, 3).unwrap());
        seal.generate_keys().await.unwrap();
        let (service, _store) = local_service(seal);

        assert_eq!(
            service.put("secrets/a", b"v").await.unwrap_err(),
            VaultError::Sealed
        );
        assert_eq!(service.get("secrets/a").await.unwrap_err(), VaultError::Sealed);
        assert_eq!(
            service.delete("secrets/a").await.unwrap_err(),
            VaultError::Sealed
        );
        assert_eq!(service.list("").await.unwrap_err(), VaultError::Sealed);
    }

    #[tokio::test]
    async fn same_calls_succeed_after_unsealing() {
        let seal = Arc::new(Seal::new(5, 3).unwrap());
        let shares = seal.generate_keys().await.unwrap();
        let (service, _store) = local_service(Arc::clone(&seal));

        assert_eq!(
            service.put("secrets/a", b"v").await.unwrap_err(),
            VaultError::Sealed
        );

        for share in shares.iter().take(3) {
            seal.unseal(share).await.unwrap();
        }

        service.put("secrets/a", b"v").await.unwrap();
        assert_eq!(service.get("secrets/a").await.unwrap(), b"v");
    }

    #[tokio::test]
    async fn put_get_roundtrip() {
        let seal = unsealed_seal(5, 3).await;
        let (service, store) = local_service(seal);

        service.put("secrets/db/pass", b"hunter2").await.unwrap();
        assert_eq!(service.get("secrets/db/pass").await.unwrap(), b"hunter2");

        // Storage only ever sees ciphertext.
        let stored = store.get("secrets/db/pass").await.unwrap().unwrap();
        assert_ne!(stored, b"hunter2".to_vec());
        assert!(!stored
            .windows(b"hunter2".len())
            .any(|w| w == b"hunter2"));
    }

    #[tokio::test]
    async fn get_unknown_path_is_not_found() {
        let seal = unsealed_seal(3, 2).await;
        let (service, _store) = local_service(seal);
        assert_eq!(
            service.get("does/not/exist").await.unwrap_err(),
            VaultError::NotFound
        );
    }

    #[tokio::test]
    async fn delete_then_get_not_found_and_redelete_ok() {
        let seal = unsealed_seal(3, 2).await;
        let (service, _store) = local_service(seal);

        service.put("k", b"v").await.unwrap();
        service.delete("k").await.unwrap();
        assert_eq!(service.get("k").await.unwrap_err(), VaultError::NotFound);
        service.delete("k").await.unwrap();
    }

    #[tokio::test]
    async fn list_returns_prefixed_paths_in_order() {
        let seal = unsealed_seal(3, 2).await;
        let (service, _store) = local_service(seal);

        service.put("secrets/db/pass", b"v1").await.unwrap();
        service.put("secrets/db/user", b"v2").await.unwrap();
        service.put("secrets/api/key", b"v3").await.unwrap();
        service.put("config/feature", b"v4").await.unwrap();

        let keys = service.list("secrets/db/").await.unwrap();
        assert_eq!(keys, vec!["secrets/db/pass", "secrets/db/user"]);
    }

    #[tokio::test]
    async fn corrupted_blob_maps_to_internal() {
        let seal = unsealed_seal(3, 2).await;
        let (service, store) = local_service(seal);

        service.put("k", b"v").await.unwrap();
        let mut blob = store.get("k").await.unwrap().unwrap();
        *blob.last_mut().unwrap() ^= 0x01;
        store.put("k", &blob).await.unwrap();

        assert_eq!(service.get("k").await.unwrap_err(), VaultError::Internal);
    }

    #[tokio::test]
    async fn replicated_writes_flow_through_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryBackend::new());
        let node = Arc::new(
            RaftNode::open(
                RaftConfig::new("node-1", dir.path().join("raft")),
                Arc::clone(&store) as Arc<dyn VaultStore>,
            )
            .await
            .unwrap(),
        );

        let seal = unsealed_seal(3, 2).await;
        let service = VaultService::new(
            seal,
            Arc::clone(&store) as Arc<dyn VaultStore>,
            Some(Arc::clone(&node)),
        );

        service.put("hello", b"world").await.unwrap();
        assert_eq!(service.get("hello").await.unwrap(), b"world");
        assert_eq!(node.last_applied().await.unwrap(), 1);

        service.delete("hello").await.unwrap();
        assert_eq!(
            service.get("hello").await.unwrap_err(),
            VaultError::NotFound
        );
        assert_eq!(node.last_applied().await.unwrap(), 2);

        node.shutdown().await;
    }

    #[tokio::test]
    async fn non_leader_write_maps_to_internal() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryBackend::new());
        let mut cfg = RaftConfig::new("node-2", dir.path().join("raft"));
        cfg.bootstrap = false;
        let node = Arc::new(
            RaftNode::open(cfg, Arc::clone(&store) as Arc<dyn VaultStore>)
                .await
                .unwrap(),
        );

        let seal = unsealed_seal(3, 2).await;
        let service = VaultService::new(
            seal,
            Arc::clone(&store) as Arc<dyn VaultStore>,
            Some(Arc::clone(&node)),
        );

        assert_eq!(
            service.put("k", b"v").await.unwrap_err(),
            VaultError::Internal
        );
        node.shutdown().await;
    }
}
