//! Envelope encryption for Rune.
//!
//! Every stored value is encrypted under a fresh 256-bit data encryption key
//! (DEK); the DEK itself is encrypted under the master key. The resulting
//! blob is self-describing:
//!
//! ```text
//! u16 BE  length of wrapped DEK
//! bytes   wrapped DEK   = nonce (12) || ciphertext (32) || tag (16)
//! bytes   value ct      = nonce (12) || ciphertext     || tag (16)
//! ```
//!
//! Wrapping only small DEKs under the master key bounds the cryptographic
//! work per master key and leaves room for key rotation by rewrapping DEKs
//! without touching value ciphertext.
//!
//! # Security model
//!
//! - Every AEAD operation draws a fresh 96-bit nonce from `OsRng`.
//! - DEKs are used once and zeroized when the call returns.
//! - Key types never expose their bytes in `Debug` output.

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// AES-256 key length in bytes.
pub const KEY_SIZE: usize = 32;

/// Nonce length for AES-256-GCM (96 bits).
const NONCE_LEN: usize = 12;

/// Minimum inner ciphertext length: 12-byte nonce + 16-byte tag.
const MIN_AEAD_LEN: usize = NONCE_LEN + 16;

/// A 256-bit symmetric key that is zeroized on drop.
///
/// Used for both the master key and per-value DEKs. The inner bytes are
/// never exposed in `Debug` output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create a key from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeySize`] if the slice is not exactly
    /// 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeySize {
                    expected: KEY_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self(array))
    }

    /// Generate a new random key using the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&key);
        Self(bytes)
    }

    /// Borrow the raw key bytes.
    ///
    /// Use with care — the caller must not log or persist these bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Envelope encryption engine bound to a master key.
///
/// Stateless apart from the key; safe to invoke concurrently.
pub struct EnvelopeEngine {
    master_key: EncryptionKey,
}

impl EnvelopeEngine {
    /// Create an engine from a master key.
    #[must_use]
    pub fn new(master_key: EncryptionKey) -> Self {
        Self { master_key }
    }

    /// Create an engine from raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeySize`] if the key is not 256 bits.
    pub fn from_key_bytes(key: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self::new(EncryptionKey::from_slice(key)?))
    }

    /// Envelope-encrypt a plaintext.
    ///
    /// Draws a fresh DEK, wraps it under the master key, encrypts the value
    /// under the DEK, and assembles the self-describing blob. Empty
    /// plaintexts are permitted.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Encryption`] if either AEAD operation fails.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let dek = EncryptionKey::generate();

        let wrapped_dek = aead_seal(&self.master_key, dek.as_bytes())?;
        let value_ct = aead_seal(&dek, plaintext)?;

        // The length field is u16; a wrapped 32-byte DEK is 60 bytes, so
        // this can only fail if the blob layout itself changes.
        let wrap_len = u16::try_from(wrapped_dek.len()).map_err(|_| CryptoError::Encryption {
            reason: "wrapped DEK exceeds length field".to_owned(),
        })?;

        let mut blob = Vec::with_capacity(2 + wrapped_dek.len() + value_ct.len());
        blob.extend_from_slice(&wrap_len.to_be_bytes());
        blob.extend_from_slice(&wrapped_dek);
        blob.extend_from_slice(&value_ct);
        Ok(blob)
    }

    /// Reverse the envelope encryption.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::CiphertextTooShort`] if the blob is too short
    /// for its declared structure, or [`CryptoError::Decryption`] if either
    /// AEAD layer fails to authenticate.
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if blob.len() < 2 {
            return Err(CryptoError::CiphertextTooShort {
                expected: 2,
                actual: blob.len(),
            });
        }

        let wrap_len = usize::from(u16::from_be_bytes([blob[0], blob[1]]));
        if blob.len() < 2 + wrap_len {
            return Err(CryptoError::CiphertextTooShort {
                expected: 2 + wrap_len,
                actual: blob.len(),
            });
        }

        let wrapped_dek = &blob[2..2 + wrap_len];
        let value_ct = &blob[2 + wrap_len..];

        let dek_bytes = aead_open(&self.master_key, wrapped_dek)?;
        let dek = EncryptionKey::from_slice(&dek_bytes).map_err(|_| CryptoError::Decryption {
            reason: "recovered data key has invalid size".to_owned(),
        })?;

        aead_open(&dek, value_ct)
    }
}

impl fmt::Debug for EnvelopeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeEngine").finish_non_exhaustive()
    }
}

/// AES-256-GCM encrypt with a fresh random nonce.
///
/// Returns `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
fn aead_seal(key: &EncryptionKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::Encryption {
            reason: e.to_string(),
        })?;

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce);
    combined.extend_from_slice(&ciphertext);
    Ok(combined)
}

/// Decrypt ciphertext produced by [`aead_seal`].
fn aead_open(key: &EncryptionKey, combined: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if combined.len() < MIN_AEAD_LEN {
        return Err(CryptoError::CiphertextTooShort {
            expected: MIN_AEAD_LEN,
            actual: combined.len(),
        });
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| CryptoError::Decryption {
            reason: e.to_string(),
        })
}
