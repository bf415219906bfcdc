//! Secret routes: `/v1/secret/*`
//!
//! Values cross the HTTP boundary base64-encoded; plaintext bytes exist
//! only inside the vault facade.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/v1/secret` router.
///
/// Paths:
/// - `GET    /v1/secret/data/{*path}` — read
/// - `PUT    /v1/secret/data/{*path}` — write
/// - `DELETE /v1/secret/data/{*path}` — delete
/// - `GET    /v1/secret/list/{*path}` — list keys under a prefix
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/data/{*path}",
            get(read_secret).put(write_secret).delete(delete_secret),
        )
        .route("/list/{*path}", get(list_secrets))
}

// ── Request / Response types ─────────────────────────────────────────

/// Request body for `PUT /v1/secret/data/{*path}`.
#[derive(Debug, Deserialize)]
pub struct WriteRequest {
    /// Base64-encoded secret value.
    pub value: String,
}

/// Response body for `GET /v1/secret/data/{*path}`.
#[derive(Debug, Serialize)]
pub struct SecretResponse {
    /// Base64-encoded plaintext value.
    pub value: String,
}

/// Response body for `PUT /v1/secret/data/{*path}`.
#[derive(Debug, Serialize)]
pub struct WriteResponse {
    pub success: bool,
}

/// Response body for `GET /v1/secret/list/{*path}`.
#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub keys: Vec<String>,
}

// ── Handlers ─────────────────────────────────────────────────────────

/// Read and decrypt a secret.
async fn read_secret(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<Json<SecretResponse>, AppError> {
    let value = state.vault.get(&path).await?;
    Ok(Json(SecretResponse {
        value: BASE64.encode(value),
    }))
}

/// Encrypt and store a secret.
async fn write_secret(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Json(body): Json<WriteRequest>,
) -> Result<Json<WriteResponse>, AppError> {
    let value = BASE64
        .decode(&body.value)
        .map_err(|_| AppError::BadRequest("value is not valid base64".to_owned()))?;

    state.vault.put(&path, &value).await?;
    Ok(Json(WriteResponse { success: true }))
}

/// Delete a secret. Idempotent.
async fn delete_secret(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<StatusCode, AppError> {
    state.vault.delete(&path).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// List stored paths under a prefix. Returns paths only, never values.
async fn list_secrets(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<Json<ListResponse>, AppError> {
    let keys = state.vault.list(&path).await?;
    Ok(Json(ListResponse { keys }))
}
