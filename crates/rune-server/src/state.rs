//! Shared application state for HTTP handlers.

use std::sync::Arc;

use rune_core::Seal;

use crate::service::VaultService;

/// State shared across all routes.
pub struct AppState {
    /// The seal lifecycle manager, driven by `/v1/sys` routes.
    pub seal: Arc<Seal>,
    /// The vault facade, driving all secret operations.
    pub vault: Arc<VaultService>,
}
