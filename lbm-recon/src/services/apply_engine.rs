//! Apply Engine
//!
//! Commits a reviewed session's change set to the inventory store inside a
//! single transaction. Deletions never run implicitly: a delete executes
//! only when individually approved, and a session whose unapproved
//! deletions exceed the safety cap refuses to apply at all. The cap guards
//! against partial uploads where a truncated document would otherwise wipe
//! most of a dealer's inventory.

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::db;
use crate::error::{ReconError, ReconResult};
use crate::models::{
    AppliedCounts, ApprovalStatus, ChangeKind, ChangeRecord, ExtractionSession, SessionState,
};

/// Minimum unapproved-deletion allowance regardless of inventory size
pub const DELETION_CAP_FLOOR: usize = 3;

/// Fraction of the inventory snapshot allowed to be deleted unreviewed
pub const DELETION_CAP_RATIO: f64 = 0.2;

/// Unapproved-deletion cap for a given inventory snapshot size
pub fn deletion_cap(inventory_count: i64) -> usize {
    let proportional = (inventory_count.max(0) as f64 * DELETION_CAP_RATIO).floor() as usize;
    proportional.max(DELETION_CAP_FLOOR)
}

/// Apply a session's change set.
///
/// Preconditions: the session must be REVIEWING. An APPLIED session
/// replays its recorded counts without touching inventory, making apply
/// idempotent. Any other state is an error.
///
/// The inventory writes and the session's APPLIED transition commit in
/// one transaction, so a retried apply can never observe mutated
/// inventory under a still-REVIEWING session. A storage failure rolls
/// everything back and surfaces as `ApplyConflict`, leaving the session
/// in REVIEWING so the operator can retry.
pub async fn apply_session(
    pool: &SqlitePool,
    session: &mut ExtractionSession,
    records: &[ChangeRecord],
) -> ReconResult<AppliedCounts> {
    match session.state {
        SessionState::Reviewing => {}
        SessionState::Applied => {
            let counts = session.applied_counts.ok_or_else(|| {
                ReconError::Internal(format!(
                    "Applied session {} has no recorded counts",
                    session.session_id
                ))
            })?;
            info!(
                session_id = %session.session_id,
                "Session already applied; replaying recorded counts"
            );
            return Ok(counts);
        }
        state => {
            return Err(ReconError::InvalidState {
                operation: "apply",
                state,
            })
        }
    }

    let cap = deletion_cap(session.inventory_count);
    let unapproved_deletes = records
        .iter()
        .filter(|r| r.kind == ChangeKind::Delete && r.approval == ApprovalStatus::Pending)
        .count();
    if unapproved_deletes > cap {
        warn!(
            session_id = %session.session_id,
            unapproved = unapproved_deletes,
            cap = cap,
            "Refusing to apply: unapproved deletions exceed safety cap"
        );
        return Err(ReconError::DeletionThresholdExceeded {
            unapproved: unapproved_deletes,
            cap,
        });
    }

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| ReconError::ApplyConflict(format!("Failed to open transaction: {}", e)))?;

    let mut counts = AppliedCounts::default();
    for record in records {
        if !record.auto_applicable() {
            counts.skipped += 1;
            continue;
        }
        match apply_record(&mut tx, session, record).await {
            Ok(kind) => match kind {
                ChangeKind::Create => counts.created += 1,
                ChangeKind::Update => counts.updated += 1,
                ChangeKind::Delete => counts.deleted += 1,
                ChangeKind::Unchanged => counts.unchanged += 1,
            },
            Err(e) => {
                // Dropping tx rolls back everything applied so far
                warn!(
                    session_id = %session.session_id,
                    change_id = %record.change_id,
                    error = %e,
                    "Apply failed mid-transaction; rolling back"
                );
                return Err(ReconError::ApplyConflict(e.to_string()));
            }
        }
    }

    session.applied_counts = Some(counts);
    session
        .transition_to(SessionState::Applied)
        .map_err(|state| ReconError::Internal(format!("Illegal transition to APPLIED from {}", state)))?;
    db::sessions::save_session(&mut *tx, session)
        .await
        .map_err(|e| ReconError::ApplyConflict(format!("Failed to persist session state: {}", e)))?;

    tx.commit()
        .await
        .map_err(|e| ReconError::ApplyConflict(format!("Failed to commit: {}", e)))?;

    info!(
        session_id = %session.session_id,
        created = counts.created,
        updated = counts.updated,
        deleted = counts.deleted,
        unchanged = counts.unchanged,
        skipped = counts.skipped,
        "Session applied"
    );

    Ok(counts)
}

async fn apply_record(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    session: &ExtractionSession,
    record: &ChangeRecord,
) -> ReconResult<ChangeKind> {
    match record.kind {
        ChangeKind::Create => {
            let candidate = record.candidate.as_ref().ok_or_else(|| {
                ReconError::Internal(format!("Create record {} has no candidate", record.change_id))
            })?;
            db::listings::insert_listing(&mut *tx, session.dealer_id, candidate).await?;
        }
        ChangeKind::Update => {
            let candidate = record.candidate.as_ref().ok_or_else(|| {
                ReconError::Internal(format!("Update record {} has no candidate", record.change_id))
            })?;
            let listing_id = record.existing_id.ok_or_else(|| {
                ReconError::Internal(format!("Update record {} has no target", record.change_id))
            })?;
            db::listings::apply_update(&mut *tx, listing_id, &record.diff, candidate).await?;
        }
        ChangeKind::Delete => {
            let listing_id = record.existing_id.ok_or_else(|| {
                ReconError::Internal(format!("Delete record {} has no target", record.change_id))
            })?;
            db::listings::delete_listing(&mut *tx, listing_id).await?;
        }
        ChangeKind::Unchanged => {}
    }
    Ok(record.kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CandidateListing, FieldChange, VariantSource};
    use uuid::Uuid;

    fn candidate(variant: &str, monthly: i64) -> CandidateListing {
        CandidateListing {
            make: "Toyota".to_string(),
            model: "Aygo X".to_string(),
            variant: variant.to_string(),
            variant_source: VariantSource::Existing,
            monthly_price: monthly,
            first_payment: 4999,
            period_months: 36,
            mileage_per_year: 15000,
            horsepower: None,
            fuel_type: None,
            provenance: None,
        }
    }

    fn record(
        session_id: Uuid,
        kind: ChangeKind,
        existing_id: Option<Uuid>,
        candidate: Option<CandidateListing>,
        diff: Vec<FieldChange>,
    ) -> ChangeRecord {
        ChangeRecord {
            change_id: Uuid::new_v4(),
            session_id,
            kind,
            existing_id,
            candidate,
            confidence: 1.0,
            ambiguous: false,
            tier: None,
            match_score: None,
            diff,
            rationale: String::new(),
            approval: ApprovalStatus::Pending,
            inventory_at_start: None,
        }
    }

    async fn reviewing_session(
        pool: &sqlx::SqlitePool,
        dealer: Uuid,
        inventory_count: i64,
    ) -> ExtractionSession {
        let mut session = ExtractionSession::new(dealer, inventory_count, Vec::new());
        session.transition_to(SessionState::Reviewing).unwrap();
        crate::db::sessions::save_session(pool, &session).await.unwrap();
        session
    }

    #[tokio::test]
    async fn applied_state_commits_with_inventory() {
        let pool = crate::db::test_pool().await;
        let dealer = Uuid::new_v4();
        let mut session = reviewing_session(&pool, dealer, 0).await;

        let records = vec![record(
            session.session_id,
            ChangeKind::Create,
            None,
            Some(candidate("Active", 2699)),
            Vec::new(),
        )];
        let counts = apply_session(&pool, &mut session, &records).await.unwrap();
        assert_eq!(counts.created, 1);

        // Both the inventory and the session row reflect the commit
        assert_eq!(crate::db::listings::count_inventory(&pool, dealer).await.unwrap(), 1);
        let loaded = crate::db::sessions::load_session(&pool, session.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.state, SessionState::Applied);
        assert_eq!(loaded.applied_counts, Some(counts));
        assert!(loaded.applied_at.is_some());
    }

    #[tokio::test]
    async fn failed_write_rolls_back_inventory_and_state() {
        let pool = crate::db::test_pool().await;
        let dealer = Uuid::new_v4();

        let mut conn = pool.acquire().await.unwrap();
        crate::db::listings::insert_listing(&mut conn, dealer, &candidate("Active", 2699))
            .await
            .unwrap();
        drop(conn);

        let mut session = reviewing_session(&pool, dealer, 1).await;

        // A create that succeeds, then an update targeting a listing that
        // no longer exists: the offer insert hits the foreign key and the
        // whole transaction must roll back.
        let records = vec![
            record(
                session.session_id,
                ChangeKind::Create,
                None,
                Some(candidate("Pulse", 3200)),
                Vec::new(),
            ),
            record(
                session.session_id,
                ChangeKind::Update,
                Some(Uuid::new_v4()),
                Some(candidate("Sport", 3600)),
                vec![FieldChange::new("monthly_price", 3400, 3600)],
            ),
        ];
        let result = apply_session(&pool, &mut session, &records).await;
        assert!(matches!(result, Err(ReconError::ApplyConflict(_))));

        // Neither the create nor any session change was committed
        assert_eq!(crate::db::listings::count_inventory(&pool, dealer).await.unwrap(), 1);
        let loaded = crate::db::sessions::load_session(&pool, session.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.state, SessionState::Reviewing);
        assert_eq!(loaded.applied_counts, None);
    }

    #[test]
    fn cap_uses_floor_for_small_inventories() {
        assert_eq!(deletion_cap(0), 3);
        assert_eq!(deletion_cap(5), 3);
        assert_eq!(deletion_cap(15), 3);
        // 20% takes over past 15 listings
        assert_eq!(deletion_cap(16), 3);
        assert_eq!(deletion_cap(20), 4);
        assert_eq!(deletion_cap(40), 8);
        assert_eq!(deletion_cap(99), 19);
    }
}
