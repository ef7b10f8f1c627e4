//! Database access for lbm-recon
//!
//! SQLite via sqlx. Inventory tables (`listings`, `lease_offers`) plus the
//! audit tables (`extraction_sessions`, `change_records`,
//! `session_metrics`). Sessions and change records persist indefinitely
//! for audit, even after APPLIED/REJECTED.

pub mod listings;
pub mod metrics;
pub mod sessions;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Create lbm-recon tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS listings (
            id TEXT PRIMARY KEY,
            dealer_id TEXT NOT NULL,
            make TEXT NOT NULL,
            model TEXT NOT NULL,
            variant TEXT NOT NULL,
            horsepower INTEGER,
            fuel_type TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_listings_dealer ON listings(dealer_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lease_offers (
            id TEXT PRIMARY KEY,
            listing_id TEXT NOT NULL REFERENCES listings(id) ON DELETE CASCADE,
            monthly_price INTEGER NOT NULL,
            first_payment INTEGER NOT NULL,
            period_months INTEGER NOT NULL,
            mileage_per_year INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_offers_listing ON lease_offers(listing_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS extraction_sessions (
            session_id TEXT PRIMARY KEY,
            dealer_id TEXT NOT NULL,
            state TEXT NOT NULL,
            inventory_count INTEGER NOT NULL,
            rejected TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            applied_at TEXT,
            applied_counts TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sessions_dealer ON extraction_sessions(dealer_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS change_records (
            change_id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES extraction_sessions(session_id),
            position INTEGER NOT NULL,
            kind TEXT NOT NULL,
            existing_id TEXT,
            candidate TEXT,
            confidence REAL NOT NULL,
            ambiguous INTEGER NOT NULL DEFAULT 0,
            tier TEXT,
            match_score REAL,
            diff TEXT NOT NULL DEFAULT '[]',
            rationale TEXT NOT NULL,
            approval TEXT NOT NULL DEFAULT 'pending',
            inventory_at_start INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_changes_session ON change_records(session_id, position)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS session_metrics (
            session_id TEXT PRIMARY KEY,
            total_candidates INTEGER NOT NULL,
            rejected_count INTEGER NOT NULL,
            exact_matches INTEGER NOT NULL,
            close_matches INTEGER NOT NULL,
            loose_matches INTEGER NOT NULL,
            unmatched INTEGER NOT NULL,
            inference_rate REAL NOT NULL,
            deletion_count INTEGER NOT NULL,
            deletion_cap INTEGER NOT NULL,
            recorded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!(
        "Database tables initialized (listings, lease_offers, extraction_sessions, change_records, session_metrics)"
    );

    Ok(())
}

/// Create in-memory test database.
///
/// Single connection: each connection to `sqlite::memory:` gets its own
/// private database, so a larger pool would scatter the tables.
#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");
    init_tables(&pool).await.unwrap();
    pool
}
