//! Session Manager
//!
//! Orchestrates the reconciliation pipeline and owns the session
//! lifecycle. Two concurrency controls live here:
//!
//! - A per-dealer advisory lock: at most one non-terminal session per
//!   dealer, so a second extraction cannot race the first one's snapshot.
//!   The registry is rebuilt from non-terminal sessions at startup.
//! - A per-session transition mutex: concurrent reject/apply calls
//!   serialize, and the loser observes the terminal state as
//!   `InvalidState` instead of corrupting the session.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::{Mutex, RwLock};
use tracing::info;
use uuid::Uuid;

use crate::db;
use crate::error::{ReconError, ReconResult};
use crate::models::{
    AppliedCounts, ApprovalStatus, ChangeRecord, ExtractionSession, SessionState,
};
use crate::services::{apply_engine, classifier, metrics, normalizer, ListingMatcher};

pub struct SessionManager {
    pool: SqlitePool,
    matcher: ListingMatcher,
    /// dealer_id → active session_id
    dealer_locks: Arc<RwLock<HashMap<Uuid, Uuid>>>,
    /// session_id → transition mutex
    transition_locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl SessionManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            matcher: ListingMatcher::new(),
            dealer_locks: Arc::new(RwLock::new(HashMap::new())),
            transition_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Rebuild the dealer lock registry from non-terminal sessions.
    ///
    /// Called once at startup so a restart cannot admit a second session
    /// for a dealer whose previous session is still open.
    pub async fn restore_locks(&self) -> ReconResult<usize> {
        let active = db::sessions::load_active_sessions(&self.pool).await?;
        let mut locks = self.dealer_locks.write().await;
        for session in &active {
            locks.insert(session.dealer_id, session.session_id);
        }
        if !active.is_empty() {
            info!(count = active.len(), "Restored dealer locks for open sessions");
        }
        Ok(active.len())
    }

    /// Run the full pipeline for one dealer's raw extraction output.
    ///
    /// Normalize → snapshot inventory → match → classify → persist. The
    /// session lands in PENDING with its change set staged; nothing
    /// touches the inventory until apply.
    pub async fn start_session(
        &self,
        dealer_id: Uuid,
        raw_records: &[Value],
    ) -> ReconResult<(ExtractionSession, Vec<ChangeRecord>)> {
        // Reserve the dealer before any async work; the placeholder is
        // replaced with the real session id on success.
        {
            let mut locks = self.dealer_locks.write().await;
            if locks.contains_key(&dealer_id) {
                return Err(ReconError::DealerBusy(dealer_id));
            }
            locks.insert(dealer_id, Uuid::nil());
        }

        match self.run_pipeline(dealer_id, raw_records).await {
            Ok((session, records)) => {
                self.dealer_locks
                    .write()
                    .await
                    .insert(dealer_id, session.session_id);
                Ok((session, records))
            }
            Err(e) => {
                self.dealer_locks.write().await.remove(&dealer_id);
                Err(e)
            }
        }
    }

    async fn run_pipeline(
        &self,
        dealer_id: Uuid,
        raw_records: &[Value],
    ) -> ReconResult<(ExtractionSession, Vec<ChangeRecord>)> {
        let (candidates, rejected) = normalizer::normalize_batch(raw_records);
        let inventory = db::listings::snapshot_inventory(&self.pool, dealer_id).await?;

        let results: Vec<_> = candidates
            .iter()
            .map(|c| self.matcher.match_candidate(c, &inventory))
            .collect();

        let session = ExtractionSession::new(dealer_id, inventory.len() as i64, rejected);
        let records = classifier::classify(session.session_id, &candidates, &results, &inventory);

        db::sessions::save_session(&self.pool, &session).await?;
        db::sessions::save_change_records(&self.pool, &records).await?;

        let session_metrics =
            metrics::build_metrics(&session, raw_records.len(), &candidates, &results, &records);
        metrics::record(&self.pool, &session_metrics).await;

        info!(
            session_id = %session.session_id,
            dealer_id = %dealer_id,
            candidates = candidates.len(),
            rejected = session.rejected.len(),
            changes = records.len(),
            inventory = session.inventory_count,
            "Extraction session created"
        );

        Ok((session, records))
    }

    /// Load a session and its change records
    pub async fn get_session(
        &self,
        session_id: Uuid,
    ) -> ReconResult<(ExtractionSession, Vec<ChangeRecord>)> {
        let session = db::sessions::load_session(&self.pool, session_id)
            .await?
            .ok_or_else(|| ReconError::NotFound(format!("session {}", session_id)))?;
        let records = db::sessions::load_change_records(&self.pool, session_id).await?;
        Ok((session, records))
    }

    /// Approve or decline one change record.
    ///
    /// The first review action moves a PENDING session to REVIEWING.
    pub async fn review_change(
        &self,
        session_id: Uuid,
        change_id: Uuid,
        approve: bool,
    ) -> ReconResult<ExtractionSession> {
        let lock = self.transition_lock(session_id).await;
        let _guard = lock.lock().await;

        let mut session = db::sessions::load_session(&self.pool, session_id)
            .await?
            .ok_or_else(|| ReconError::NotFound(format!("session {}", session_id)))?;

        if session.state.is_terminal() {
            return Err(ReconError::InvalidState {
                operation: "review",
                state: session.state,
            });
        }
        if session.state == SessionState::Pending {
            let transition = session
                .transition_to(SessionState::Reviewing)
                .map_err(|state| ReconError::InvalidState {
                    operation: "review",
                    state,
                })?;
            db::sessions::save_session(&self.pool, &session).await?;
            info!(
                session_id = %session_id,
                old_state = %transition.old_state,
                new_state = %transition.new_state,
                "Session state transition"
            );
        }

        let approval = if approve {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Declined
        };
        let updated =
            db::sessions::update_approval(&self.pool, session_id, change_id, approval).await?;
        if !updated {
            return Err(ReconError::NotFound(format!(
                "change record {} in session {}",
                change_id, session_id
            )));
        }

        Ok(session)
    }

    /// Apply the session's reviewed change set to the inventory.
    ///
    /// Idempotent: an already-applied session replays its recorded counts
    /// without mutating inventory.
    pub async fn apply(
        &self,
        session_id: Uuid,
    ) -> ReconResult<(ExtractionSession, AppliedCounts)> {
        let lock = self.transition_lock(session_id).await;
        let _guard = lock.lock().await;

        let mut session = db::sessions::load_session(&self.pool, session_id)
            .await?
            .ok_or_else(|| ReconError::NotFound(format!("session {}", session_id)))?;
        let records = db::sessions::load_change_records(&self.pool, session_id).await?;

        // The engine persists the APPLIED transition atomically with the
        // inventory writes; releasing the dealer lock is a no-op on replay.
        let counts = apply_engine::apply_session(&self.pool, &mut session, &records).await?;
        self.release_dealer(&session).await;

        Ok((session, counts))
    }

    /// Discard a session without touching the inventory
    pub async fn reject(&self, session_id: Uuid) -> ReconResult<ExtractionSession> {
        let lock = self.transition_lock(session_id).await;
        let _guard = lock.lock().await;

        let mut session = db::sessions::load_session(&self.pool, session_id)
            .await?
            .ok_or_else(|| ReconError::NotFound(format!("session {}", session_id)))?;

        session
            .transition_to(SessionState::Rejected)
            .map_err(|state| ReconError::InvalidState {
                operation: "reject",
                state,
            })?;
        db::sessions::save_session(&self.pool, &session).await?;
        self.release_dealer(&session).await;

        info!(session_id = %session_id, "Session rejected");
        Ok(session)
    }

    /// Release the dealer's advisory lock when its session terminates
    async fn release_dealer(&self, session: &ExtractionSession) {
        let mut locks = self.dealer_locks.write().await;
        if locks.get(&session.dealer_id) == Some(&session.session_id) {
            locks.remove(&session.dealer_id);
        }
    }

    async fn transition_lock(&self, session_id: Uuid) -> Arc<Mutex<()>> {
        let mut map = self.transition_locks.lock().await;
        map.entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CandidateListing, ChangeKind, FuelType, VariantSource};
    use serde_json::json;

    async fn manager() -> SessionManager {
        SessionManager::new(crate::db::test_pool().await)
    }

    async fn seed_listing(
        pool: &SqlitePool,
        dealer: Uuid,
        variant: &str,
        monthly: i64,
    ) -> Uuid {
        let candidate = CandidateListing {
            make: "Toyota".to_string(),
            model: "Aygo X".to_string(),
            variant: variant.to_string(),
            variant_source: VariantSource::Existing,
            monthly_price: monthly,
            first_payment: 4999,
            period_months: 36,
            mileage_per_year: 15000,
            horsepower: Some(72),
            fuel_type: Some(FuelType::Gasoline),
            provenance: None,
        };
        let mut conn = pool.acquire().await.unwrap();
        db::listings::insert_listing(&mut conn, dealer, &candidate)
            .await
            .unwrap()
    }

    fn raw(variant: &str, monthly: i64) -> Value {
        json!({
            "make": "Toyota",
            "model": "Aygo X",
            "variant": variant,
            "monthly_price": monthly,
            "first_payment": 4999,
            "period_months": 36,
            "mileage_per_year": 15000,
        })
    }

    #[tokio::test]
    async fn start_session_stages_changes_without_touching_inventory() {
        let mgr = manager().await;
        let dealer = Uuid::new_v4();
        seed_listing(&mgr.pool, dealer, "Active", 2699).await;

        let (session, records) = mgr
            .start_session(dealer, &[raw("Active", 2799), raw("Pulse", 3200)])
            .await
            .unwrap();

        assert_eq!(session.state, SessionState::Pending);
        assert_eq!(session.inventory_count, 1);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, ChangeKind::Update);
        assert_eq!(records[1].kind, ChangeKind::Create);

        // Inventory untouched until apply
        let inventory = db::listings::snapshot_inventory(&mgr.pool, dealer)
            .await
            .unwrap();
        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory[0].offers[0].monthly_price, 2699);
    }

    #[tokio::test]
    async fn one_session_per_dealer() {
        let mgr = manager().await;
        let dealer = Uuid::new_v4();

        let (session, _) = mgr.start_session(dealer, &[raw("Active", 2699)]).await.unwrap();
        let second = mgr.start_session(dealer, &[raw("Active", 2699)]).await;
        assert!(matches!(second, Err(ReconError::DealerBusy(d)) if d == dealer));

        // Another dealer is unaffected
        mgr.start_session(Uuid::new_v4(), &[raw("Active", 2699)])
            .await
            .unwrap();

        // Rejecting releases the lock
        mgr.reject(session.session_id).await.unwrap();
        mgr.start_session(dealer, &[raw("Active", 2699)]).await.unwrap();
    }

    #[tokio::test]
    async fn review_moves_pending_to_reviewing() {
        let mgr = manager().await;
        let dealer = Uuid::new_v4();
        let (session, records) = mgr.start_session(dealer, &[raw("Active", 2699)]).await.unwrap();

        let session = mgr
            .review_change(session.session_id, records[0].change_id, true)
            .await
            .unwrap();
        assert_eq!(session.state, SessionState::Reviewing);

        let (_, records) = mgr.get_session(session.session_id).await.unwrap();
        assert_eq!(records[0].approval, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn review_unknown_change_is_not_found() {
        let mgr = manager().await;
        let (session, _) = mgr
            .start_session(Uuid::new_v4(), &[raw("Active", 2699)])
            .await
            .unwrap();

        let result = mgr
            .review_change(session.session_id, Uuid::new_v4(), true)
            .await;
        assert!(matches!(result, Err(ReconError::NotFound(_))));
    }

    #[tokio::test]
    async fn apply_commits_and_is_idempotent() {
        let mgr = manager().await;
        let dealer = Uuid::new_v4();
        let existing = seed_listing(&mgr.pool, dealer, "Active", 2699).await;
        seed_listing(&mgr.pool, dealer, "Pulse", 3200).await;

        // Update Active's price, create Sport; Pulse becomes a staged delete.
        // Sport's price sits outside the loose tier's +/-25% band around
        // both existing listings, so it cannot read as a rename of Pulse.
        let (session, records) = mgr
            .start_session(dealer, &[raw("Active", 2799), raw("Sport", 4100)])
            .await
            .unwrap();
        assert_eq!(records.len(), 3);

        // First review action transitions the session; delete stays unapproved
        mgr.review_change(session.session_id, records[0].change_id, true)
            .await
            .unwrap();

        let (session, counts) = mgr.apply(session.session_id).await.unwrap();
        assert_eq!(session.state, SessionState::Applied);
        assert_eq!(counts.created, 1);
        assert_eq!(counts.updated, 1);
        assert_eq!(counts.deleted, 0);
        assert_eq!(counts.skipped, 1);

        let inventory = db::listings::snapshot_inventory(&mgr.pool, dealer)
            .await
            .unwrap();
        assert_eq!(inventory.len(), 3);
        let active = inventory.iter().find(|l| l.id == existing).unwrap();
        assert_eq!(active.offers[0].monthly_price, 2799);

        // Re-apply replays recorded counts without mutating inventory
        let (_, replay) = mgr.apply(session.session_id).await.unwrap();
        assert_eq!(replay, counts);
        let inventory = db::listings::snapshot_inventory(&mgr.pool, dealer)
            .await
            .unwrap();
        assert_eq!(inventory.len(), 3);
    }

    #[tokio::test]
    async fn apply_from_pending_is_invalid() {
        let mgr = manager().await;
        let (session, _) = mgr
            .start_session(Uuid::new_v4(), &[raw("Active", 2699)])
            .await
            .unwrap();

        let result = mgr.apply(session.session_id).await;
        assert!(matches!(
            result,
            Err(ReconError::InvalidState {
                state: SessionState::Pending,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn partial_upload_blocks_on_deletion_cap() {
        let mgr = manager().await;
        let dealer = Uuid::new_v4();
        for i in 0..40 {
            seed_listing(&mgr.pool, dealer, &format!("Trim {}", i), 2000 + i).await;
        }

        // Truncated document: 5 candidates against 40 listings stages 35
        // deletions, far over the cap of max(3, 40/5) = 8
        let raws: Vec<_> = (0..5).map(|i| raw(&format!("Trim {}", i), 2000 + i)).collect();
        let (session, records) = mgr.start_session(dealer, &raws).await.unwrap();
        let deletes = records.iter().filter(|r| r.kind == ChangeKind::Delete).count();
        assert_eq!(deletes, 35);

        mgr.review_change(session.session_id, records[0].change_id, true)
            .await
            .unwrap();

        let result = mgr.apply(session.session_id).await;
        assert!(matches!(
            result,
            Err(ReconError::DeletionThresholdExceeded { unapproved: 35, cap: 8 })
        ));

        // Session stays REVIEWING and the inventory is untouched
        let (session, _) = mgr.get_session(session.session_id).await.unwrap();
        assert_eq!(session.state, SessionState::Reviewing);
        assert_eq!(
            db::listings::count_inventory(&mgr.pool, dealer).await.unwrap(),
            40
        );
    }

    #[tokio::test]
    async fn reject_after_apply_is_invalid() {
        let mgr = manager().await;
        let dealer = Uuid::new_v4();
        let (session, records) = mgr.start_session(dealer, &[raw("Active", 2699)]).await.unwrap();

        mgr.review_change(session.session_id, records[0].change_id, true)
            .await
            .unwrap();
        mgr.apply(session.session_id).await.unwrap();

        let result = mgr.reject(session.session_id).await;
        assert!(matches!(
            result,
            Err(ReconError::InvalidState {
                state: SessionState::Applied,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn restore_locks_rebuilds_registry() {
        let pool = crate::db::test_pool().await;
        let dealer = Uuid::new_v4();

        let mgr = SessionManager::new(pool.clone());
        mgr.start_session(dealer, &[raw("Active", 2699)]).await.unwrap();

        // Fresh manager over the same pool, as after a restart
        let mgr = SessionManager::new(pool);
        assert_eq!(mgr.restore_locks().await.unwrap(), 1);

        let result = mgr.start_session(dealer, &[raw("Active", 2699)]).await;
        assert!(matches!(result, Err(ReconError::DealerBusy(_))));
    }
}
