//! Session metrics persistence

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{ReconError, ReconResult};
use crate::models::SessionMetrics;

/// Record a session's quality counters (one row per session)
pub async fn insert_metrics(pool: &SqlitePool, metrics: &SessionMetrics) -> ReconResult<()> {
    sqlx::query(
        r#"
        INSERT INTO session_metrics (
            session_id, total_candidates, rejected_count, exact_matches,
            close_matches, loose_matches, unmatched, inference_rate,
            deletion_count, deletion_cap, recorded_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(metrics.session_id.to_string())
    .bind(metrics.total_candidates)
    .bind(metrics.rejected_count)
    .bind(metrics.exact_matches)
    .bind(metrics.close_matches)
    .bind(metrics.loose_matches)
    .bind(metrics.unmatched)
    .bind(metrics.inference_rate)
    .bind(metrics.deletion_count)
    .bind(metrics.deletion_cap)
    .bind(metrics.recorded_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch the counters recorded for one session
pub async fn get_metrics(pool: &SqlitePool, session_id: Uuid) -> ReconResult<Option<SessionMetrics>> {
    let row = sqlx::query(
        r#"
        SELECT session_id, total_candidates, rejected_count, exact_matches,
               close_matches, loose_matches, unmatched, inference_rate,
               deletion_count, deletion_cap, recorded_at
        FROM session_metrics
        WHERE session_id = ?
        "#,
    )
    .bind(session_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        Ok(SessionMetrics {
            session_id: Uuid::parse_str(&row.get::<String, _>("session_id"))
                .map_err(|e| ReconError::Internal(format!("Invalid UUID in database: {}", e)))?,
            total_candidates: row.get("total_candidates"),
            rejected_count: row.get("rejected_count"),
            exact_matches: row.get("exact_matches"),
            close_matches: row.get("close_matches"),
            loose_matches: row.get("loose_matches"),
            unmatched: row.get("unmatched"),
            inference_rate: row.get("inference_rate"),
            deletion_count: row.get("deletion_count"),
            deletion_cap: row.get("deletion_cap"),
            recorded_at: chrono::DateTime::parse_from_rfc3339(&row.get::<String, _>("recorded_at"))
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .map_err(|e| ReconError::Internal(format!("Invalid timestamp in database: {}", e)))?,
        })
    })
    .transpose()
}
