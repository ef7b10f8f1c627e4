//! lbm-recon library interface
//!
//! Extraction reconciliation engine for the leasing marketplace: matches
//! AI-extracted vehicle candidates against a dealer's existing inventory,
//! stages the resulting change set in a reviewable session, and commits
//! approved changes transactionally.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::services::{ExtractionProvider, SessionManager};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Session lifecycle orchestrator (owns the dealer locks)
    pub sessions: Arc<SessionManager>,
    /// External extraction service client
    pub extractor: Arc<dyn ExtractionProvider>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, extractor: Arc<dyn ExtractionProvider>) -> Self {
        Self {
            sessions: Arc::new(SessionManager::new(db.clone())),
            db,
            extractor,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::session_routes())
        .merge(api::audit_routes())
        .merge(api::health_routes())
        .with_state(state)
}
