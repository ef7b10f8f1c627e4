//! Error types for lbm-recon
//!
//! Two layers, following the service convention: `ReconError` is the typed
//! domain taxonomy surfaced by the session manager and apply engine;
//! `ApiError` adapts it (plus transport-level failures) to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::SessionState;

/// Domain errors for the reconciliation engine
#[derive(Debug, Error)]
pub enum ReconError {
    /// Unapproved deletions exceed the safety cap; apply blocked, session
    /// stays in REVIEWING until deletions are individually approved
    #[error("Deletion threshold exceeded: {unapproved} unapproved deletions, cap is {cap}")]
    DeletionThresholdExceeded { unapproved: usize, cap: usize },

    /// Storage-layer transaction failure during commit; rolled back, safe to retry
    #[error("Apply conflict: {0}")]
    ApplyConflict(String),

    /// Operation attempted against a session in an incompatible lifecycle state
    #[error("Invalid state for {operation}: session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// External extraction call failed after retries; no session created
    #[error("External extraction service failed after retries")]
    ExternalServiceTimeout,

    /// External extraction call failed with a non-retryable error
    /// (rejected request, auth failure, malformed response)
    #[error("External extraction service failure: {0}")]
    ExternalServiceFailure(String),

    /// Another session for the same dealer is in flight (advisory lock held)
    #[error("Dealer {0} already has an extraction session in flight")]
    DealerBusy(Uuid),

    /// Session or change record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Database operation error outside the apply transaction
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Internal processing error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Domain error with per-variant status mapping
    #[error(transparent)]
    Recon(#[from] ReconError),

    /// Common library error
    #[error("Common error: {0}")]
    Common(#[from] lbm_common::Error),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Recon(err) => {
                let (status, code) = match &err {
                    ReconError::DeletionThresholdExceeded { .. } => {
                        (StatusCode::CONFLICT, "DELETION_THRESHOLD_EXCEEDED")
                    }
                    ReconError::ApplyConflict(_) => (StatusCode::CONFLICT, "APPLY_CONFLICT"),
                    ReconError::InvalidState { .. } => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_STATE")
                    }
                    ReconError::ExternalServiceTimeout => {
                        (StatusCode::GATEWAY_TIMEOUT, "EXTERNAL_SERVICE_TIMEOUT")
                    }
                    ReconError::ExternalServiceFailure(_) => {
                        (StatusCode::BAD_GATEWAY, "EXTERNAL_SERVICE_FAILURE")
                    }
                    ReconError::DealerBusy(_) => (StatusCode::CONFLICT, "DEALER_BUSY"),
                    ReconError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                    ReconError::Database(_) | ReconError::Internal(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
                    }
                };
                (status, code, err.to_string())
            }
            ApiError::Common(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
            ApiError::Other(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type for domain operations
pub type ReconResult<T> = Result<T, ReconError>;
