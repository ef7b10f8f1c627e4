//! Per-session quality metrics
//!
//! Write-only from the pipeline's point of view: nothing in the
//! reconciliation path reads these back. The audit API exposes them for
//! extraction quality monitoring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Quality counters recorded once per extraction session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub session_id: Uuid,
    /// Raw records handed to the normalizer
    pub total_candidates: i64,
    /// Records the normalizer dropped
    pub rejected_count: i64,
    pub exact_matches: i64,
    pub close_matches: i64,
    pub loose_matches: i64,
    /// Candidates with no inventory match (classified as creates)
    pub unmatched: i64,
    /// Fraction of accepted candidates whose variant was inferred
    pub inference_rate: f64,
    pub deletion_count: i64,
    /// Unapproved-deletion cap in force for this session
    pub deletion_cap: i64,
    pub recorded_at: DateTime<Utc>,
}
