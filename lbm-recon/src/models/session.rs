//! Extraction session state machine
//!
//! A session progresses through four states:
//! PENDING → REVIEWING → APPLIED, with REJECTED reachable from any
//! pre-terminal state. Terminal states never transition again; re-entrant
//! apply on an APPLIED session replays the original result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::RejectedCandidate;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionState {
    /// Change set populated by the pipeline; editable only via review actions
    Pending,
    /// Operator (or automated policy) reviewing individual change records
    Reviewing,
    /// Approved subset committed to inventory (terminal)
    Applied,
    /// Session discarded, no inventory mutation (terminal)
    Rejected,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Pending => "PENDING",
            SessionState::Reviewing => "REVIEWING",
            SessionState::Applied => "APPLIED",
            SessionState::Rejected => "REJECTED",
        }
    }

    /// Whether the session has reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Applied | SessionState::Rejected)
    }

    /// Legal state-machine edges
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Pending, SessionState::Reviewing)
                | (SessionState::Pending, SessionState::Rejected)
                | (SessionState::Reviewing, SessionState::Applied)
                | (SessionState::Reviewing, SessionState::Rejected)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State transition event (for logging and audit)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub session_id: Uuid,
    pub old_state: SessionState,
    pub new_state: SessionState,
    pub transitioned_at: DateTime<Utc>,
}

/// Per-kind counts committed by the Apply Engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedCounts {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    /// Records skipped (declined, or unapproved ambiguous/deletes under cap)
    pub skipped: usize,
}

/// One extraction run's scoped change set and lifecycle state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSession {
    pub session_id: Uuid,
    pub dealer_id: Uuid,
    pub state: SessionState,
    /// Dealer inventory size at the snapshot taken on session creation
    pub inventory_count: i64,
    /// Raw records that failed normalization (kept for audit)
    pub rejected: Vec<RejectedCandidate>,
    pub created_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
    /// Set once on apply; replayed on idempotent re-apply
    pub applied_counts: Option<AppliedCounts>,
}

impl ExtractionSession {
    /// Create a new session in PENDING
    pub fn new(dealer_id: Uuid, inventory_count: i64, rejected: Vec<RejectedCandidate>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            dealer_id,
            state: SessionState::Pending,
            inventory_count,
            rejected,
            created_at: Utc::now(),
            applied_at: None,
            applied_counts: None,
        }
    }

    /// Transition to a new state, rejecting illegal edges.
    ///
    /// Centralizing the check here means callers cannot corrupt a terminal
    /// session; the Session Manager is the only caller.
    pub fn transition_to(&mut self, new_state: SessionState) -> Result<StateTransition, SessionState> {
        if !self.state.can_transition_to(new_state) {
            return Err(self.state);
        }
        let transition = StateTransition {
            session_id: self.session_id,
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };
        self.state = new_state;
        if new_state == SessionState::Applied {
            self.applied_at = Some(transition.transitioned_at);
        }
        Ok(transition)
    }
}
