//! Extraction session and change record persistence
//!
//! Sessions and their change records are never deleted; APPLIED and
//! REJECTED sessions remain queryable for audit.

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{ReconError, ReconResult};
use crate::models::{
    AppliedCounts, ApprovalStatus, ChangeKind, ChangeRecord, ExtractionSession, MatchTier,
    SessionState,
};

/// Save (insert or update) a session.
///
/// Generic over the executor so the Apply Engine can persist the state
/// transition inside the same transaction as the inventory writes.
pub async fn save_session<'e, E>(executor: E, session: &ExtractionSession) -> ReconResult<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let rejected = serde_json::to_string(&session.rejected)
        .map_err(|e| ReconError::Internal(format!("Failed to serialize rejections: {}", e)))?;
    let applied_counts = session
        .applied_counts
        .map(|c| serde_json::to_string(&c))
        .transpose()
        .map_err(|e| ReconError::Internal(format!("Failed to serialize counts: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO extraction_sessions (
            session_id, dealer_id, state, inventory_count, rejected,
            created_at, applied_at, applied_counts
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(session_id) DO UPDATE SET
            state = excluded.state,
            applied_at = excluded.applied_at,
            applied_counts = excluded.applied_counts
        "#,
    )
    .bind(session.session_id.to_string())
    .bind(session.dealer_id.to_string())
    .bind(session.state.as_str())
    .bind(session.inventory_count)
    .bind(&rejected)
    .bind(session.created_at.to_rfc3339())
    .bind(session.applied_at.map(|dt| dt.to_rfc3339()))
    .bind(applied_counts)
    .execute(executor)
    .await?;

    Ok(())
}

/// Load one session
pub async fn load_session(
    pool: &SqlitePool,
    session_id: Uuid,
) -> ReconResult<Option<ExtractionSession>> {
    let row = sqlx::query(
        r#"
        SELECT session_id, dealer_id, state, inventory_count, rejected,
               created_at, applied_at, applied_counts
        FROM extraction_sessions
        WHERE session_id = ?
        "#,
    )
    .bind(session_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(session_from_row).transpose()
}

/// All sessions not yet in a terminal state (used to rebuild the dealer
/// lock registry after restart)
pub async fn load_active_sessions(pool: &SqlitePool) -> ReconResult<Vec<ExtractionSession>> {
    let rows = sqlx::query(
        r#"
        SELECT session_id, dealer_id, state, inventory_count, rejected,
               created_at, applied_at, applied_counts
        FROM extraction_sessions
        WHERE state NOT IN ('APPLIED', 'REJECTED')
        ORDER BY created_at
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(session_from_row).collect()
}

/// Session history for the audit endpoint, newest first
pub async fn list_sessions(
    pool: &SqlitePool,
    dealer_id: Option<Uuid>,
) -> ReconResult<Vec<ExtractionSession>> {
    let rows = match dealer_id {
        Some(dealer) => {
            sqlx::query(
                r#"
                SELECT session_id, dealer_id, state, inventory_count, rejected,
                       created_at, applied_at, applied_counts
                FROM extraction_sessions
                WHERE dealer_id = ?
                ORDER BY created_at DESC
                "#,
            )
            .bind(dealer.to_string())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                SELECT session_id, dealer_id, state, inventory_count, rejected,
                       created_at, applied_at, applied_counts
                FROM extraction_sessions
                ORDER BY created_at DESC
                "#,
            )
            .fetch_all(pool)
            .await?
        }
    };

    rows.into_iter().map(session_from_row).collect()
}

fn session_from_row(row: sqlx::sqlite::SqliteRow) -> ReconResult<ExtractionSession> {
    let state = parse_state(&row.get::<String, _>("state"))?;
    let rejected = serde_json::from_str(&row.get::<String, _>("rejected"))
        .map_err(|e| ReconError::Internal(format!("Failed to deserialize rejections: {}", e)))?;
    let applied_counts: Option<AppliedCounts> = row
        .get::<Option<String>, _>("applied_counts")
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| ReconError::Internal(format!("Failed to deserialize counts: {}", e)))?;

    Ok(ExtractionSession {
        session_id: parse_uuid(row.get("session_id"))?,
        dealer_id: parse_uuid(row.get("dealer_id"))?,
        state,
        inventory_count: row.get("inventory_count"),
        rejected,
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
        applied_at: row
            .get::<Option<String>, _>("applied_at")
            .map(|s| parse_timestamp(&s))
            .transpose()?,
        applied_counts,
    })
}

/// Persist a session's change records in classification order
pub async fn save_change_records(
    pool: &SqlitePool,
    records: &[ChangeRecord],
) -> ReconResult<()> {
    for (position, record) in records.iter().enumerate() {
        let candidate = record
            .candidate
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| ReconError::Internal(format!("Failed to serialize candidate: {}", e)))?;
        let diff = serde_json::to_string(&record.diff)
            .map_err(|e| ReconError::Internal(format!("Failed to serialize diff: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO change_records (
                change_id, session_id, position, kind, existing_id, candidate,
                confidence, ambiguous, tier, match_score, diff, rationale,
                approval, inventory_at_start
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.change_id.to_string())
        .bind(record.session_id.to_string())
        .bind(position as i64)
        .bind(record.kind.as_str())
        .bind(record.existing_id.map(|id| id.to_string()))
        .bind(candidate)
        .bind(record.confidence)
        .bind(record.ambiguous as i64)
        .bind(record.tier.map(|t| t.as_str()))
        .bind(record.match_score)
        .bind(&diff)
        .bind(&record.rationale)
        .bind(record.approval.as_str())
        .bind(record.inventory_at_start)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Load a session's change records in classification order
pub async fn load_change_records(
    pool: &SqlitePool,
    session_id: Uuid,
) -> ReconResult<Vec<ChangeRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT change_id, session_id, kind, existing_id, candidate, confidence,
               ambiguous, tier, match_score, diff, rationale, approval,
               inventory_at_start
        FROM change_records
        WHERE session_id = ?
        ORDER BY position
        "#,
    )
    .bind(session_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(change_from_row).collect()
}

fn change_from_row(row: sqlx::sqlite::SqliteRow) -> ReconResult<ChangeRecord> {
    let candidate = row
        .get::<Option<String>, _>("candidate")
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| ReconError::Internal(format!("Failed to deserialize candidate: {}", e)))?;
    let diff = serde_json::from_str(&row.get::<String, _>("diff"))
        .map_err(|e| ReconError::Internal(format!("Failed to deserialize diff: {}", e)))?;

    Ok(ChangeRecord {
        change_id: parse_uuid(row.get("change_id"))?,
        session_id: parse_uuid(row.get("session_id"))?,
        kind: parse_kind(&row.get::<String, _>("kind"))?,
        existing_id: row
            .get::<Option<String>, _>("existing_id")
            .map(parse_uuid)
            .transpose()?,
        candidate,
        confidence: row.get("confidence"),
        ambiguous: row.get::<i64, _>("ambiguous") != 0,
        tier: row
            .get::<Option<String>, _>("tier")
            .map(|s| parse_tier(&s))
            .transpose()?,
        match_score: row.get("match_score"),
        diff,
        rationale: row.get("rationale"),
        approval: parse_approval(&row.get::<String, _>("approval"))?,
        inventory_at_start: row.get("inventory_at_start"),
    })
}

/// Update one change record's approval status.
///
/// The only mutation change records ever receive; everything else is
/// immutable once classified.
pub async fn update_approval(
    pool: &SqlitePool,
    session_id: Uuid,
    change_id: Uuid,
    approval: ApprovalStatus,
) -> ReconResult<bool> {
    let result = sqlx::query(
        "UPDATE change_records SET approval = ? WHERE change_id = ? AND session_id = ?",
    )
    .bind(approval.as_str())
    .bind(change_id.to_string())
    .bind(session_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

fn parse_uuid(s: String) -> ReconResult<Uuid> {
    Uuid::parse_str(&s).map_err(|e| ReconError::Internal(format!("Invalid UUID in database: {}", e)))
}

fn parse_timestamp(s: &str) -> ReconResult<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| ReconError::Internal(format!("Invalid timestamp in database: {}", e)))
}

fn parse_state(s: &str) -> ReconResult<SessionState> {
    match s {
        "PENDING" => Ok(SessionState::Pending),
        "REVIEWING" => Ok(SessionState::Reviewing),
        "APPLIED" => Ok(SessionState::Applied),
        "REJECTED" => Ok(SessionState::Rejected),
        other => Err(ReconError::Internal(format!("Invalid session state: {}", other))),
    }
}

fn parse_kind(s: &str) -> ReconResult<ChangeKind> {
    match s {
        "create" => Ok(ChangeKind::Create),
        "update" => Ok(ChangeKind::Update),
        "delete" => Ok(ChangeKind::Delete),
        "unchanged" => Ok(ChangeKind::Unchanged),
        other => Err(ReconError::Internal(format!("Invalid change kind: {}", other))),
    }
}

fn parse_tier(s: &str) -> ReconResult<MatchTier> {
    match s {
        "exact_key" => Ok(MatchTier::ExactKey),
        "close_variant" => Ok(MatchTier::CloseVariant),
        "loose" => Ok(MatchTier::Loose),
        other => Err(ReconError::Internal(format!("Invalid match tier: {}", other))),
    }
}

fn parse_approval(s: &str) -> ReconResult<ApprovalStatus> {
    match s {
        "pending" => Ok(ApprovalStatus::Pending),
        "approved" => Ok(ApprovalStatus::Approved),
        "declined" => Ok(ApprovalStatus::Declined),
        other => Err(ReconError::Internal(format!("Invalid approval status: {}", other))),
    }
}
