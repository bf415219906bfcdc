//! System routes: `/v1/sys/*`
//!
//! Seal lifecycle and health. These endpoints work while the vault is
//! sealed — they are how it gets unsealed.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/v1/sys` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/unseal", post(unseal))
        .route("/seal-status", get(seal_status))
        .route("/health", get(health))
}

// ── Request / Response types ─────────────────────────────────────────

/// Request body for `POST /v1/sys/unseal`.
#[derive(Debug, Deserialize)]
pub struct UnsealRequest {
    /// Base64-encoded key share.
    pub share: String,
}

/// Response body for `POST /v1/sys/unseal`.
#[derive(Debug, Serialize)]
pub struct UnsealResponse {
    /// Whether the vault is still sealed.
    pub sealed: bool,
    /// Shares required to unseal.
    pub threshold: u8,
    /// Shares accepted toward the current attempt.
    pub progress: u8,
}

/// Response body for `GET /v1/sys/seal-status` and `GET /v1/sys/health`.
#[derive(Debug, Serialize)]
pub struct SealStatusResponse {
    /// Whether the vault is currently sealed.
    pub sealed: bool,
    /// Total number of shares.
    pub shares: u8,
    /// Shares required to unseal.
    pub threshold: u8,
    /// Shares accepted in the current unseal attempt.
    pub progress: u8,
}

// ── Handlers ─────────────────────────────────────────────────────────

/// Submit one unseal key share.
async fn unseal(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UnsealRequest>,
) -> Result<Json<UnsealResponse>, AppError> {
    let outcome = state.seal.unseal(&body.share).await?;
    Ok(Json(UnsealResponse {
        sealed: !outcome.unsealed,
        threshold: state.seal.threshold(),
        progress: outcome.progress,
    }))
}

/// Current seal status.
async fn seal_status(State(state): State<Arc<AppState>>) -> Json<SealStatusResponse> {
    let status = state.seal.status().await;
    Json(SealStatusResponse {
        sealed: status.sealed,
        shares: status.shares,
        threshold: status.threshold,
        progress: status.progress,
    })
}

/// Health check. Returns 200 when unsealed, 503 while sealed.
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.seal.status().await;
    let body = SealStatusResponse {
        sealed: status.sealed,
        shares: status.shares,
        threshold: status.threshold,
        progress: status.progress,
    };
    let code = if status.sealed {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(body))
}
