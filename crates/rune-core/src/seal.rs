//! Seal/unseal lifecycle for Rune.
//!
//! The master key is never persisted. At initialization it is generated,
//! split into N Shamir shares with threshold T, and handed to operators as
//! base64 text — then discarded from memory. Reconstructing it requires any
//! T distinct shares; fewer than T reveal nothing.
//!
//! The lifecycle is a three-state machine guarded by one mutex:
//!
//! - **Uninitialized** — no master key has ever been generated here.
//! - **Sealed** — shares are being accumulated; no master key resident.
//! - **Unsealed** — the master key is resident; plaintext operations may
//!   proceed.
//!
//! The accepted-share set is cleared on every combine attempt, success or
//! failure: a failed quorum cannot be extended by one more share, and a
//! stale invalid share cannot poison a later quorum.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sharks::{Share, Sharks};
use tokio::sync::Mutex;
use tracing::info;

use crate::crypto::EncryptionKey;
use crate::error::SealError;

/// Seal lifecycle state. Transitions move the variant; there is no partial
/// state where a master key coexists with pending shares.
enum SealState {
    Uninitialized,
    Sealed { accepted: Vec<Vec<u8>> },
    Unsealed { master_key: EncryptionKey },
}

/// Result of submitting an unseal share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsealOutcome {
    /// Whether the vault is now unsealed.
    pub unsealed: bool,
    /// Number of shares counted toward the current attempt. Resets to 0
    /// when a combine attempt fails.
    pub progress: u8,
}

/// Point-in-time seal status, for operator-facing reporting.
#[derive(Debug, Clone, Copy)]
pub struct SealStatus {
    /// Whether the vault is currently sealed.
    pub sealed: bool,
    /// Total number of shares the master key was split into.
    pub shares: u8,
    /// Shares required to reconstruct the master key.
    pub threshold: u8,
    /// Shares accepted in the current unseal attempt.
    pub progress: u8,
}

/// Manages the master key lifecycle via threshold secret sharing.
///
/// All operations are mutually exclusive; the state mutex is held for the
/// full duration of each public call.
pub struct Seal {
    shares: u8,
    threshold: u8,
    state: Mutex<SealState>,
}

impl Seal {
    /// Create a new seal configured for an N-share, T-threshold split.
    ///
    /// # Errors
    ///
    /// Returns [`SealError::InvalidConfig`] unless `1 <= threshold <= shares`.
    pub fn new(shares: u8, threshold: u8) -> Result<Self, SealError> {
        if shares == 0 {
            return Err(SealError::InvalidConfig {
                reason: "share count must be at least 1".to_owned(),
            });
        }
        if threshold == 0 || threshold > shares {
            return Err(SealError::InvalidConfig {
                reason: format!(
                    "threshold must be between 1 and the share count ({shares}), got {threshold}"
                ),
            });
        }
        Ok(Self {
            shares,
            threshold,
            state: Mutex::new(SealState::Uninitialized),
        })
    }

    /// Generate a fresh master key and split it into the configured number
    /// of shares.
    ///
    /// Called exactly once per vault lifetime. The key itself is discarded;
    /// only the shares leave this call, base64-encoded. The seal remains
    /// sealed until [`unseal`](Seal::unseal) has combined `threshold`
    /// shares.
    ///
    /// # Errors
    ///
    /// Returns [`SealError::AlreadyInitialized`] if keys were already
    /// generated here, or if shares from elsewhere have been accepted.
    pub async fn generate_keys(&self) -> Result<Vec<String>, SealError> {
        let mut state = self.state.lock().await;
        if !matches!(*state, SealState::Uninitialized) {
            return Err(SealError::AlreadyInitialized);
        }

        let master_key = EncryptionKey::generate();
        let shamir = Sharks(self.threshold);
        let encoded: Vec<String> = shamir
            .dealer(master_key.as_bytes())
            .take(usize::from(self.shares))
            .map(|share| BASE64.encode(Vec::from(&share)))
            .collect();

        *state = SealState::Sealed {
            accepted: Vec::new(),
        };

        info!(
            shares = self.shares,
            threshold = self.threshold,
            "master key generated and split; seal awaiting shares"
        );

        Ok(encoded)
    }

    /// Submit one base64-encoded key share.
    ///
    /// Appends the share to the accepted set; once `threshold` shares are
    /// present, attempts reconstruction. The accepted set is cleared on
    /// every combine attempt regardless of outcome.
    ///
    /// # Errors
    ///
    /// - [`SealError::ThresholdMet`] if the master key is already resident;
    ///   state is unchanged.
    /// - [`SealError::InvalidShare`] if the share is not valid base64 (the
    ///   accepted set is unchanged), or if reconstruction fails (the
    ///   accepted set resets to empty).
    pub async fn unseal(&self, share: &str) -> Result<UnsealOutcome, SealError> {
        let mut state = self.state.lock().await;

        if matches!(*state, SealState::Unsealed { .. }) {
            return Err(SealError::ThresholdMet);
        }

        let decoded = BASE64.decode(share).map_err(|e| SealError::InvalidShare {
            reason: format!("base64 decode failed: {e}"),
        })?;

        // A share arriving at an uninitialized seal is the cold-start path:
        // some earlier process generated the shares this operator holds.
        if matches!(*state, SealState::Uninitialized) {
            *state = SealState::Sealed {
                accepted: Vec::new(),
            };
        }
        let SealState::Sealed { accepted } = &mut *state else {
            // Unsealed was rejected above; Uninitialized was just replaced.
            unreachable!();
        };

        accepted.push(decoded);
        let progress = u8::try_from(accepted.len()).unwrap_or(u8::MAX);

        if progress < self.threshold {
            return Ok(UnsealOutcome {
                unsealed: false,
                progress,
            });
        }

        // Threshold reached — take the shares and attempt reconstruction.
        // The accepted set does not survive the attempt.
        let raw_shares = std::mem::take(accepted);
        match combine(self.threshold, &raw_shares) {
            Ok(master_key) => {
                *state = SealState::Unsealed { master_key };
                info!(progress, "vault unsealed");
                Ok(UnsealOutcome {
                    unsealed: true,
                    progress,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Whether the master key is currently resident.
    pub async fn is_unsealed(&self) -> bool {
        matches!(*self.state.lock().await, SealState::Unsealed { .. })
    }

    /// Return a defensive copy of the master key.
    ///
    /// # Errors
    ///
    /// Returns [`SealError::Uninitialized`] if no master key is resident.
    pub async fn master_key(&self) -> Result<EncryptionKey, SealError> {
        match &*self.state.lock().await {
            SealState::Unsealed { master_key } => Ok(master_key.clone()),
            _ => Err(SealError::Uninitialized),
        }
    }

    /// Current seal status.
    pub async fn status(&self) -> SealStatus {
        let state = self.state.lock().await;
        let (sealed, progress) = match &*state {
            SealState::Unsealed { .. } => (false, self.threshold),
            SealState::Sealed { accepted } => {
                (true, u8::try_from(accepted.len()).unwrap_or(u8::MAX))
            }
            SealState::Uninitialized => (true, 0),
        };
        SealStatus {
            sealed,
            shares: self.shares,
            threshold: self.threshold,
            progress,
        }
    }

    /// Configured threshold.
    #[must_use]
    pub fn threshold(&self) -> u8 {
        self.threshold
    }
}

impl std::fmt::Debug for Seal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Seal")
            .field("shares", &self.shares)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

/// Reconstruct the master key from raw share bytes.
fn combine(threshold: u8, raw_shares: &[Vec<u8>]) -> Result<EncryptionKey, SealError> {
    // The first byte of a share is its evaluation point; interpolation
    // requires them to be distinct.
    let mut points: Vec<u8> = raw_shares.iter().filter_map(|s| s.first().copied()).collect();
    points.sort_unstable();
    points.dedup();
    if points.len() != raw_shares.len() {
        return Err(SealError::InvalidShare {
            reason: "duplicate share submitted".to_owned(),
        });
    }

    let parsed: Vec<Share> = raw_shares
        .iter()
        .map(|bytes| {
            Share::try_from(bytes.as_slice()).map_err(|e| SealError::InvalidShare {
                reason: format!("share deserialization failed: {e}"),
            })
        })
        .collect::<Result<_, _>>()?;

    let recovered = Sharks(threshold)
        .recover(&parsed)
        .map_err(|e| SealError::InvalidShare {
            reason: format!("share combination failed: {e}"),
        })?;

    EncryptionKey::from_slice(&recovered).map_err(|_| SealError::InvalidShare {
        reason: "recovered key is not 32 bytes".to_owned(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_rejects_bad_config() {
        assert!(matches!(
            Seal::new(0, 1),
            Err(SealError::InvalidConfig { .. })
        ));
        assert!(matches!(
            Seal::new(3, 0),
            Err(SealError::InvalidConfig { .. })
        ));
        assert!(matches!(
            Seal::new(3, 4),
            Err(SealError::InvalidConfig { .. })
        ));
        assert!(Seal::new(1, 1).is_ok());
        assert!(Seal::new(5, 3).is_ok());
        assert!(Seal::new(255, 255).is_ok());
    }

    #[tokio::test]
    async fn generate_returns_configured_share_count() {
        let seal = Seal::new(5, 3).unwrap();
        let shares = seal.generate_keys().await.unwrap();
        assert_eq!(shares.len(), 5);
        // Shares must be valid base64.
        for share in &shares {
            BASE64.decode(share).unwrap();
        }
    }

    #[tokio::test]
    async fn generate_leaves_seal_sealed() {
        let seal = Seal::new(5, 3).unwrap();
        seal.generate_keys().await.unwrap();
        assert!(!seal.is_unsealed().await);
        assert!(matches!(
            seal.master_key().await,
            Err(SealError::Uninitialized)
        ));
    }

    #[tokio::test]
    async fn generate_twice_is_rejected() {
        let seal = Seal::new(3, 2).unwrap();
        seal.generate_keys().await.unwrap();
        let err = seal.generate_keys().await.unwrap_err();
        assert!(matches!(err, SealError::AlreadyInitialized));
    }

    #[tokio::test]
    async fn threshold_progress_then_unseal_then_threshold_met() {
        // Standard operator flow: N=5, T=3.
        let seal = Seal::new(5, 3).unwrap();
        let shares = seal.generate_keys().await.unwrap();

        let outcome = seal.unseal(&shares[0]).await.unwrap();
        assert_eq!(
            outcome,
            UnsealOutcome {
                unsealed: false,
                progress: 1
            }
        );

        let outcome = seal.unseal(&shares[1]).await.unwrap();
        assert_eq!(outcome.progress, 2);
        assert!(!seal.is_unsealed().await);

        let outcome = seal.unseal(&shares[2]).await.unwrap();
        assert_eq!(
            outcome,
            UnsealOutcome {
                unsealed: true,
                progress: 3
            }
        );
        assert!(seal.is_unsealed().await);

        // A fourth share bounces off without affecting state.
        let err = seal.unseal(&shares[3]).await.unwrap_err();
        assert!(matches!(err, SealError::ThresholdMet));
        assert!(seal.is_unsealed().await);
    }

    #[tokio::test]
    async fn fewer_than_threshold_reveals_nothing() {
        let seal = Seal::new(5, 3).unwrap();
        let shares = seal.generate_keys().await.unwrap();

        seal.unseal(&shares[0]).await.unwrap();
        seal.unseal(&shares[1]).await.unwrap();

        assert!(!seal.is_unsealed().await);
        assert!(matches!(
            seal.master_key().await,
            Err(SealError::Uninitialized)
        ));
    }

    #[tokio::test]
    async fn any_threshold_subset_recovers_same_key() {
        let seal = Seal::new(5, 3).unwrap();
        let shares = seal.generate_keys().await.unwrap();

        // Cold-start seals fed different 3-subsets must converge on one key.
        let subsets: [[usize; 3]; 3] = [[0, 1, 2], [4, 2, 0], [1, 3, 4]];
        let mut keys = Vec::new();
        for subset in subsets {
            let fresh = Seal::new(5, 3).unwrap();
            for &i in &subset {
                fresh.unseal(&shares[i]).await.unwrap();
            }
            assert!(fresh.is_unsealed().await);
            keys.push(fresh.master_key().await.unwrap());
        }
        assert_eq!(keys[0].as_bytes(), keys[1].as_bytes());
        assert_eq!(keys[1].as_bytes(), keys[2].as_bytes());
    }

    #[tokio::test]
    async fn invalid_base64_does_not_consume_progress() {
        let seal = Seal::new(5, 3).unwrap();
        let shares = seal.generate_keys().await.unwrap();

        seal.unseal(&shares[0]).await.unwrap();
        let err = seal.unseal("not-valid-base64!!!").await.unwrap_err();
        assert!(matches!(err, SealError::InvalidShare { .. }));
        assert_eq!(seal.status().await.progress, 1);
    }

    #[tokio::test]
    async fn structurally_invalid_share_resets_progress() {
        // Recovery flow: a garbage share poisons the attempt, the
        // accepted set resets, and a clean resubmission unseals.
        let seal = Seal::new(5, 3).unwrap();
        let shares = seal.generate_keys().await.unwrap();

        seal.unseal(&shares[0]).await.unwrap();
        seal.unseal(&shares[1]).await.unwrap();

        // Base64-valid but not a valid share (too short to parse).
        let bogus = BASE64.encode([0x01u8]);
        let err = seal.unseal(&bogus).await.unwrap_err();
        assert!(matches!(err, SealError::InvalidShare { .. }));
        assert_eq!(seal.status().await.progress, 0);
        assert!(!seal.is_unsealed().await);

        seal.unseal(&shares[0]).await.unwrap();
        seal.unseal(&shares[1]).await.unwrap();
        let outcome = seal.unseal(&shares[2]).await.unwrap();
        assert!(outcome.unsealed);
    }

    #[tokio::test]
    async fn duplicate_share_fails_combine_and_resets() {
        let seal = Seal::new(5, 3).unwrap();
        let shares = seal.generate_keys().await.unwrap();

        seal.unseal(&shares[0]).await.unwrap();
        seal.unseal(&shares[1]).await.unwrap();
        let err = seal.unseal(&shares[1]).await.unwrap_err();
        assert!(matches!(err, SealError::InvalidShare { .. }));
        assert_eq!(seal.status().await.progress, 0);
        assert!(!seal.is_unsealed().await);
    }

    #[tokio::test]
    async fn threshold_of_one_unseals_on_first_share() {
        let seal = Seal::new(3, 1).unwrap();
        let shares = seal.generate_keys().await.unwrap();

        let outcome = seal.unseal(&shares[2]).await.unwrap();
        assert!(outcome.unsealed);
        assert_eq!(outcome.progress, 1);
        assert!(seal.master_key().await.is_ok());
    }

    #[tokio::test]
    async fn cold_start_accepts_shares_without_generate() {
        let original = Seal::new(3, 2).unwrap();
        let shares = original.generate_keys().await.unwrap();

        // A fresh process never called generate_keys but holds shares.
        let fresh = Seal::new(3, 2).unwrap();
        fresh.unseal(&shares[0]).await.unwrap();
        let outcome = fresh.unseal(&shares[2]).await.unwrap();
        assert!(outcome.unsealed);
    }

    #[tokio::test]
    async fn generate_after_accepting_share_is_rejected() {
        let original = Seal::new(3, 2).unwrap();
        let shares = original.generate_keys().await.unwrap();

        let fresh = Seal::new(3, 2).unwrap();
        fresh.unseal(&shares[0]).await.unwrap();
        let err = fresh.generate_keys().await.unwrap_err();
        assert!(matches!(err, SealError::AlreadyInitialized));
    }

    #[tokio::test]
    async fn status_reports_lifecycle() {
        let seal = Seal::new(5, 3).unwrap();
        let status = seal.status().await;
        assert!(status.sealed);
        assert_eq!(status.progress, 0);
        assert_eq!(status.shares, 5);
        assert_eq!(status.threshold, 3);

        let shares = seal.generate_keys().await.unwrap();
        seal.unseal(&shares[0]).await.unwrap();
        assert_eq!(seal.status().await.progress, 1);

        seal.unseal(&shares[1]).await.unwrap();
        seal.unseal(&shares[2]).await.unwrap();
        let status = seal.status().await;
        assert!(!status.sealed);
        assert_eq!(status.progress, 3);
    }

    #[tokio::test]
    async fn debug_does_not_leak_state() {
        let seal = Seal::new(5, 3).unwrap();
        seal.generate_keys().await.unwrap();
        let debug = format!("{seal:?}");
        assert!(debug.contains("Seal"));
        assert!(!debug.contains("accepted"));
        assert!(!debug.contains("master_key"));
    }
}
