//! Storage backend abstraction for Rune.
//!
//! This crate defines the [`StorageBackend`] trait — a pure key-value storage
//! interface that knows nothing about secrets or encryption. The service
//! layer encrypts every value before it reaches this layer, so backends only
//! ever see ciphertext.
//!
//! Two implementations are provided:
//!
//! - [`RedbStore`] — production default, a single-file embedded B-tree store
//! - [`MemoryBackend`] — in-memory, for testing only
//!
//! Backends that participate in consensus log compaction also implement
//! [`StoreImage`], the point-in-time snapshot/restore surface.

mod error;
mod image;
mod memory;
mod redb_store;

pub use error::StorageError;
pub use image::{read_image, write_image, StoreImage};
pub use memory::MemoryBackend;
pub use redb_store::RedbStore;

/// A pluggable key-value storage backend.
///
/// Keys are UTF-8 strings using `/` as a separator (e.g. `secrets/db/pass`).
/// Values are opaque byte arrays — always ciphertext by the time they reach
/// storage.
///
/// Implementations must be safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Retrieve a value by key.
    ///
    /// Returns `Ok(None)` if the key does not exist. The returned buffer is
    /// an owned copy, independent of the backend's internal storage.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store a key-value pair, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails. On
    /// failure the store is left in its pre-mutation state.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. This is idempotent — deleting a non-existent key is not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the underlying backend fails.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// List all keys that start with the given prefix, in ascending
    /// lexicographic order.
    ///
    /// Results are a snapshot; callers must not assume freshness beyond call
    /// return.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] if the underlying backend fails.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Check whether a key exists in storage.
    ///
    /// The default implementation calls [`get`](StorageBackend::get) and
    /// checks for `Some`. Backends may override this with a cheaper check.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Convenience bound for stores that can both serve the key-value contract
/// and produce/consume point-in-time images.
pub trait VaultStore: StorageBackend + StoreImage {}

impl<T: StorageBackend + StoreImage> VaultStore for T {}
