//! Change records
//!
//! A `ChangeRecord` is the atomic unit of a session's output: one proposed
//! mutation of the inventory, with confidence and a field-level diff.
//! Records are immutable once created; only the Session Manager may
//! transition the approval status.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::CandidateListing;

/// What kind of inventory mutation a change record proposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
    Unchanged,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Create => "create",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
            ChangeKind::Unchanged => "unchanged",
        }
    }
}

/// Which fuzzy-matching tier produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    /// Identity match on (make, model, variant, period, mileage)
    ExactKey,
    /// (make, model) + variant similarity >= 0.8 + price within +/-10%
    CloseVariant,
    /// (make, model) + price within +/-25%, surfaces probable renames
    Loose,
}

impl MatchTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchTier::ExactKey => "exact_key",
            MatchTier::CloseVariant => "close_variant",
            MatchTier::Loose => "loose",
        }
    }
}

/// Operator decision state for one change record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    /// No decision yet
    Pending,
    /// Explicitly approved for apply
    Approved,
    /// Explicitly declined; skipped at apply
    Declined,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Declined => "declined",
        }
    }
}

/// One field-level difference between candidate and existing record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Field name (e.g. "monthly_price")
    pub field: String,
    pub before: serde_json::Value,
    pub after: serde_json::Value,
}

impl FieldChange {
    pub fn new(
        field: impl Into<String>,
        before: impl Serialize,
        after: impl Serialize,
    ) -> Self {
        Self {
            field: field.into(),
            before: serde_json::to_value(before).unwrap_or(serde_json::Value::Null),
            after: serde_json::to_value(after).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// One proposed inventory mutation within a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub change_id: Uuid,
    pub session_id: Uuid,
    pub kind: ChangeKind,
    /// Existing listing this record refers to (absent for creates)
    pub existing_id: Option<Uuid>,
    /// Candidate payload (absent for deletes)
    pub candidate: Option<CandidateListing>,
    /// Confidence in [0,1]; capped at 0.5 when ambiguous
    pub confidence: f64,
    /// Multiple existing records tied at the top score; manual review required
    pub ambiguous: bool,
    /// Matching tier that paired candidate and existing record
    pub tier: Option<MatchTier>,
    /// Similarity score from the matcher
    pub match_score: Option<f64>,
    /// Field-level diff (updates only)
    pub diff: Vec<FieldChange>,
    /// Human-readable explanation of the classification
    pub rationale: String,
    pub approval: ApprovalStatus,
    /// Dealer inventory size at session start; set on deletes for the
    /// apply-time safety cap check
    pub inventory_at_start: Option<i64>,
}

impl ChangeRecord {
    /// Whether this record will mutate inventory when applied
    pub fn is_mutation(&self) -> bool {
        matches!(
            self.kind,
            ChangeKind::Create | ChangeKind::Update | ChangeKind::Delete
        )
    }

    /// Whether apply may act on this record without explicit approval.
    ///
    /// Declined records are always skipped. Ambiguous records and staged
    /// deletions require explicit approval; the deletion cap check in the
    /// Apply Engine decides whether unapproved deletes block the whole run.
    pub fn auto_applicable(&self) -> bool {
        self.approval == ApprovalStatus::Approved
            || (self.approval == ApprovalStatus::Pending
                && !self.ambiguous
                && self.kind != ChangeKind::Delete)
    }
}
