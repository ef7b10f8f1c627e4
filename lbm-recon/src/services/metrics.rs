//! Extraction quality metrics
//!
//! Built once per session after classification and persisted best-effort:
//! a metrics write failure is logged and swallowed, never failing the
//! session itself.

use sqlx::SqlitePool;
use tracing::warn;

use crate::db;
use crate::models::{
    CandidateListing, ChangeKind, ChangeRecord, ExtractionSession, MatchTier, SessionMetrics,
    VariantSource,
};
use crate::services::apply_engine::deletion_cap;
use crate::services::matcher::MatchResult;

/// Build the quality counters for one session's pipeline run
pub fn build_metrics(
    session: &ExtractionSession,
    total_candidates: usize,
    candidates: &[CandidateListing],
    results: &[MatchResult],
    records: &[ChangeRecord],
) -> SessionMetrics {
    let mut exact = 0i64;
    let mut close = 0i64;
    let mut loose = 0i64;
    let mut unmatched = 0i64;
    for result in results {
        match result.top().map(|m| m.tier) {
            Some(MatchTier::ExactKey) => exact += 1,
            Some(MatchTier::CloseVariant) => close += 1,
            Some(MatchTier::Loose) => loose += 1,
            None => unmatched += 1,
        }
    }

    let inferred = candidates
        .iter()
        .filter(|c| c.variant_source == VariantSource::Inferred)
        .count();
    let inference_rate = if candidates.is_empty() {
        0.0
    } else {
        inferred as f64 / candidates.len() as f64
    };

    let deletion_count = records
        .iter()
        .filter(|r| r.kind == ChangeKind::Delete)
        .count() as i64;

    SessionMetrics {
        session_id: session.session_id,
        total_candidates: total_candidates as i64,
        rejected_count: session.rejected.len() as i64,
        exact_matches: exact,
        close_matches: close,
        loose_matches: loose,
        unmatched,
        inference_rate,
        deletion_count,
        deletion_cap: deletion_cap(session.inventory_count) as i64,
        recorded_at: chrono::Utc::now(),
    }
}

/// Persist metrics, logging a warning on failure instead of propagating
pub async fn record(pool: &SqlitePool, metrics: &SessionMetrics) {
    if let Err(e) = db::metrics::insert_metrics(pool, metrics).await {
        warn!(
            session_id = %metrics.session_id,
            error = %e,
            "Failed to record session metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractionSession;
    use crate::services::matcher::ScoredMatch;
    use uuid::Uuid;

    #[test]
    fn tier_counts_and_inference_rate() {
        let session = ExtractionSession::new(Uuid::new_v4(), 40, Vec::new());

        let candidate = |source| CandidateListing {
            make: "Toyota".to_string(),
            model: "Yaris".to_string(),
            variant: "Active".to_string(),
            variant_source: source,
            monthly_price: 2699,
            first_payment: 4999,
            period_months: 36,
            mileage_per_year: 15000,
            horsepower: None,
            fuel_type: None,
            provenance: None,
        };
        let candidates = vec![
            candidate(VariantSource::Existing),
            candidate(VariantSource::Inferred),
            candidate(VariantSource::Inferred),
            candidate(VariantSource::Existing),
        ];

        let matched = |tier| MatchResult {
            matches: vec![ScoredMatch {
                listing_id: Uuid::new_v4(),
                score: 0.9,
                tier,
            }],
            ambiguous: false,
        };
        let results = vec![
            matched(MatchTier::ExactKey),
            matched(MatchTier::CloseVariant),
            matched(MatchTier::Loose),
            MatchResult::default(),
        ];

        let metrics = build_metrics(&session, 6, &candidates, &results, &[]);
        assert_eq!(metrics.total_candidates, 6);
        assert_eq!(metrics.rejected_count, 0);
        assert_eq!(metrics.exact_matches, 1);
        assert_eq!(metrics.close_matches, 1);
        assert_eq!(metrics.loose_matches, 1);
        assert_eq!(metrics.unmatched, 1);
        assert!((metrics.inference_rate - 0.5).abs() < 1e-12);
        assert_eq!(metrics.deletion_cap, 8);
    }
}
