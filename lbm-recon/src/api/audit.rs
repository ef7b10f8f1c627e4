//! Audit API handlers
//!
//! Read-only views over session history and extraction quality metrics.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db;
use crate::error::{ApiResult, ReconError};
use crate::models::{AppliedCounts, SessionMetrics, SessionState};
use crate::AppState;

/// GET /audit/sessions query parameters
#[derive(Debug, Deserialize)]
pub struct SessionListQuery {
    pub dealer_id: Option<Uuid>,
}

/// One row in the session history listing
#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub dealer_id: Uuid,
    pub state: SessionState,
    pub inventory_count: i64,
    pub rejected_count: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub applied_at: Option<chrono::DateTime<chrono::Utc>>,
    pub applied_counts: Option<AppliedCounts>,
}

/// GET /audit/sessions
///
/// Session history, newest first, optionally filtered by dealer.
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionListQuery>,
) -> ApiResult<Json<Vec<SessionSummary>>> {
    let sessions = db::sessions::list_sessions(&state.db, query.dealer_id).await?;
    let summaries = sessions
        .into_iter()
        .map(|s| SessionSummary {
            session_id: s.session_id,
            dealer_id: s.dealer_id,
            state: s.state,
            inventory_count: s.inventory_count,
            rejected_count: s.rejected.len(),
            created_at: s.created_at,
            applied_at: s.applied_at,
            applied_counts: s.applied_counts,
        })
        .collect();
    Ok(Json(summaries))
}

/// GET /audit/sessions/:id/metrics
pub async fn get_session_metrics(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionMetrics>> {
    let metrics = db::metrics::get_metrics(&state.db, session_id)
        .await?
        .ok_or_else(|| ReconError::NotFound(format!("metrics for session {}", session_id)))?;
    Ok(Json(metrics))
}

/// Build audit routes
pub fn audit_routes() -> Router<AppState> {
    Router::new()
        .route("/audit/sessions", get(list_sessions))
        .route("/audit/sessions/:id/metrics", get(get_session_metrics))
}
