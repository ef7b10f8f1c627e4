//! Session lifecycle API handlers
//!
//! POST /sessions, POST /sessions/extract, GET /sessions/:id, plus the
//! review, apply, and reject actions.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::{
    AppliedCounts, ChangeRecord, ExtractionSession, RejectedCandidate, SessionState,
};
use crate::AppState;

/// POST /sessions request: pre-extracted raw candidate records
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub dealer_id: Uuid,
    pub candidates: Vec<Value>,
}

/// POST /sessions/extract request: document text for the external
/// extraction service
#[derive(Debug, Deserialize)]
pub struct ExtractSessionRequest {
    pub dealer_id: Uuid,
    pub document_text: String,
}

/// Session plus its staged change set
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub dealer_id: Uuid,
    pub state: SessionState,
    pub inventory_count: i64,
    pub rejected: Vec<RejectedCandidate>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub applied_at: Option<chrono::DateTime<chrono::Utc>>,
    pub applied_counts: Option<AppliedCounts>,
    pub changes: Vec<ChangeRecord>,
}

impl SessionResponse {
    fn from_parts(session: ExtractionSession, changes: Vec<ChangeRecord>) -> Self {
        Self {
            session_id: session.session_id,
            dealer_id: session.dealer_id,
            state: session.state,
            inventory_count: session.inventory_count,
            rejected: session.rejected,
            created_at: session.created_at,
            applied_at: session.applied_at,
            applied_counts: session.applied_counts,
            changes,
        }
    }
}

/// POST /sessions/:id/changes/:change_id/review request
#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub approve: bool,
}

/// POST /sessions/:id/apply response
#[derive(Debug, Serialize)]
pub struct ApplyResponse {
    pub session_id: Uuid,
    pub state: SessionState,
    pub applied_counts: AppliedCounts,
}

/// Session state after a lifecycle action
#[derive(Debug, Serialize)]
pub struct SessionStateResponse {
    pub session_id: Uuid,
    pub state: SessionState,
}

/// POST /sessions
///
/// Run the reconciliation pipeline over pre-extracted candidate records.
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<Json<SessionResponse>> {
    let (session, changes) = state
        .sessions
        .start_session(request.dealer_id, &request.candidates)
        .await?;
    Ok(Json(SessionResponse::from_parts(session, changes)))
}

/// POST /sessions/extract
///
/// Extract candidates from document text via the external service, then
/// run the same pipeline. Extraction failure creates no session.
pub async fn extract_session(
    State(state): State<AppState>,
    Json(request): Json<ExtractSessionRequest>,
) -> ApiResult<Json<SessionResponse>> {
    let candidates = state.extractor.extract(&request.document_text).await?;
    let (session, changes) = state
        .sessions
        .start_session(request.dealer_id, &candidates)
        .await?;
    Ok(Json(SessionResponse::from_parts(session, changes)))
}

/// GET /sessions/:id
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionResponse>> {
    let (session, changes) = state.sessions.get_session(session_id).await?;
    Ok(Json(SessionResponse::from_parts(session, changes)))
}

/// POST /sessions/:id/changes/:change_id/review
pub async fn review_change(
    State(state): State<AppState>,
    Path((session_id, change_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<ReviewRequest>,
) -> ApiResult<Json<SessionStateResponse>> {
    let session = state
        .sessions
        .review_change(session_id, change_id, request.approve)
        .await?;
    Ok(Json(SessionStateResponse {
        session_id: session.session_id,
        state: session.state,
    }))
}

/// POST /sessions/:id/apply
pub async fn apply_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<ApplyResponse>> {
    let (session, counts) = state.sessions.apply(session_id).await?;
    Ok(Json(ApplyResponse {
        session_id: session.session_id,
        state: session.state,
        applied_counts: counts,
    }))
}

/// POST /sessions/:id/reject
pub async fn reject_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionStateResponse>> {
    let session = state.sessions.reject(session_id).await?;
    Ok(Json(SessionStateResponse {
        session_id: session.session_id,
        state: session.state,
    }))
}

/// Build session routes
pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/extract", post(extract_session))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/changes/:change_id/review", post(review_change))
        .route("/sessions/:id/apply", post(apply_session))
        .route("/sessions/:id/reject", post(reject_session))
}
