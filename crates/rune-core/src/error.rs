//! Error types for `rune-core`.
//!
//! Crypto errors never include key material — only sizes and operation
//! descriptions.

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The provided key is not 256 bits.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize { expected: usize, actual: usize },

    /// The ciphertext is too short to contain the declared structure.
    #[error("ciphertext too short: expected at least {expected} bytes, got {actual}")]
    CiphertextTooShort { expected: usize, actual: usize },

    /// AES-256-GCM encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// AES-256-GCM decryption failed (wrong key, corrupted ciphertext, or
    /// tampered tag).
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },
}

/// Errors from seal/unseal operations.
#[derive(Debug, thiserror::Error)]
pub enum SealError {
    /// `generate_keys` has already been called (or shares have already been
    /// accepted) on this seal.
    #[error("seal is already initialized")]
    AlreadyInitialized,

    /// No master key is resident; the vault has not been unsealed.
    #[error("seal is not initialized")]
    Uninitialized,

    /// The unseal threshold has already been met; the share was ignored.
    #[error("unseal threshold has been met")]
    ThresholdMet,

    /// The provided share is not valid.
    #[error("provided share is not valid: {reason}")]
    InvalidShare { reason: String },

    /// Invalid share count / threshold configuration.
    #[error("invalid seal config: {reason}")]
    InvalidConfig { reason: String },
}
