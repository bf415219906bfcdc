//! Core library for Rune.
//!
//! Contains the envelope encryption engine and the seal/unseal lifecycle.
//! This crate knows nothing about storage backends, consensus, or transport —
//! it deals purely in key material and ciphertext.

pub mod crypto;
pub mod error;
pub mod seal;

pub use crypto::{EncryptionKey, EnvelopeEngine};
pub use error::{CryptoError, SealError};
pub use seal::{Seal, SealStatus, UnsealOutcome};
