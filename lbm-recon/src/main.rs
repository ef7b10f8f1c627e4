//! lbm-recon - Extraction Reconciliation Service
//!
//! Receives AI-extracted vehicle candidates (directly or via the external
//! extraction service), reconciles them against dealer inventory, and
//! exposes the review/apply session lifecycle over HTTP REST.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use lbm_recon::config::ReconConfig;
use lbm_recon::services::HttpExtractionClient;
use lbm_recon::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting lbm-recon (Extraction Reconciliation) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = ReconConfig::load()?;

    // Resolve root folder: env > TOML > OS default
    let root_folder = lbm_common::config::resolve_root_folder("LBM_RECON_ROOT", "recon");
    let db_path = root_folder.join("recon.db");
    info!("Database: {}", db_path.display());

    let db_pool = lbm_recon::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    let extractor = HttpExtractionClient::new(
        config.extractor_url.clone(),
        config.extractor_api_key.clone(),
    )?;
    info!("Extraction service: {}", config.extractor_url);

    let state = AppState::new(db_pool, Arc::new(extractor));

    // Re-arm per-dealer locks for sessions still open from a previous run
    state.sessions.restore_locks().await?;

    let app = lbm_recon::build_router(state);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", config.port)).await?;
    info!("Listening on http://127.0.0.1:{}", config.port);
    info!("Health check: http://127.0.0.1:{}/health", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
