//! HTTP error types for the Rune server.
//!
//! Maps domain errors into coarse HTTP responses. Every error variant
//! produces a JSON body with a machine-readable `error` field and a
//! human-readable `message`. Messages never carry cryptographic or storage
//! detail.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use rune_core::SealError;

use crate::service::VaultError;

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// The vault is sealed — reject all secret operations.
    Sealed,
    /// Requested resource not found.
    NotFound(String),
    /// Client sent invalid input.
    BadRequest(String),
    /// A conflict (e.g. threshold already met).
    Conflict(String),
    /// Internal server error, opaque to the client.
    Internal,
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::Sealed => (
                StatusCode::SERVICE_UNAVAILABLE,
                "sealed",
                "vault is sealed".to_owned(),
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            Self::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal error".to_owned(),
            ),
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<VaultError> for AppError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::Sealed => Self::Sealed,
            VaultError::NotFound => Self::NotFound("secret not found".to_owned()),
            VaultError::Internal => Self::Internal,
        }
    }
}

impl From<SealError> for AppError {
    fn from(err: SealError) -> Self {
        match err {
            SealError::AlreadyInitialized | SealError::ThresholdMet => {
                Self::Conflict(err.to_string())
            }
            SealError::InvalidShare { .. } | SealError::InvalidConfig { .. } => {
                Self::BadRequest(err.to_string())
            }
            SealError::Uninitialized => Self::Internal,
        }
    }
}
