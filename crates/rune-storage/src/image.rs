//! Point-in-time store images.
//!
//! A store image is a length-prefixed stream of entries:
//!
//! ```text
//! u32 BE key_len | key bytes | u32 BE value_len | value bytes   (repeated)
//! ```
//!
//! The format is private to snapshot/restore — nothing else reads it. Images
//! are produced under a single read transaction, so an image is a consistent
//! view of the store at one point in time regardless of concurrent writers.

use std::io::{self, Read, Write};

use crate::StorageError;

/// Snapshot/restore surface for stores that participate in consensus log
/// compaction.
///
/// Both methods are blocking; async callers run them on the blocking thread
/// pool.
pub trait StoreImage: Send + Sync {
    /// Stream a consistent point-in-time image of the store to `w`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Snapshot`] if reading the store or writing to
    /// the sink fails. A partially written image must be discarded by the
    /// caller.
    fn snapshot(&self, w: &mut dyn Write) -> Result<(), StorageError>;

    /// Replace the entire contents of the store with the image read from `r`.
    ///
    /// After a successful restore all previously read state is stale; callers
    /// must re-read. On failure the store retains its pre-restore contents.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Restore`] if the image is malformed or the
    /// store cannot be rebuilt.
    fn restore(&self, r: &mut dyn Read) -> Result<(), StorageError>;
}

/// Write a single image entry.
///
/// # Errors
///
/// Propagates I/O errors from the sink.
pub fn write_image(w: &mut dyn Write, key: &str, value: &[u8]) -> io::Result<()> {
    let key_bytes = key.as_bytes();
    w.write_all(&(key_bytes.len() as u32).to_be_bytes())?;
    w.write_all(key_bytes)?;
    w.write_all(&(value.len() as u32).to_be_bytes())?;
    w.write_all(value)?;
    Ok(())
}

/// Read all image entries from `r` until end of stream.
///
/// # Errors
///
/// Returns [`StorageError::Restore`] on a truncated entry, a non-UTF-8 key,
/// or an I/O failure.
pub fn read_image(r: &mut dyn Read) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
    let mut entries = Vec::new();
    loop {
        let mut len_buf = [0u8; 4];
        match r.read_exact(&mut len_buf) {
            Ok(()) => {}
            // A clean EOF between entries terminates the image.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                return Err(StorageError::Restore {
                    reason: format!("failed to read entry header: {e}"),
                })
            }
        }
        let key_len = u32::from_be_bytes(len_buf) as usize;

        let mut key_buf = vec![0u8; key_len];
        r.read_exact(&mut key_buf)
            .map_err(|e| StorageError::Restore {
                reason: format!("truncated key: {e}"),
            })?;
        let key = String::from_utf8(key_buf).map_err(|e| StorageError::Restore {
            reason: format!("key is not valid UTF-8: {e}"),
        })?;

        r.read_exact(&mut len_buf)
            .map_err(|e| StorageError::Restore {
                reason: format!("truncated value length: {e}"),
            })?;
        let value_len = u32::from_be_bytes(len_buf) as usize;

        let mut value = vec![0u8; value_len];
        r.read_exact(&mut value)
            .map_err(|e| StorageError::Restore {
                reason: format!("truncated value: {e}"),
            })?;

        entries.push((key, value));
    }
    Ok(entries)
}
