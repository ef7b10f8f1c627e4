//! Data models for the reconciliation engine

pub mod change;
pub mod listing;
pub mod metrics;
pub mod session;

pub use change::{ApprovalStatus, ChangeKind, ChangeRecord, FieldChange, MatchTier};
pub use listing::{
    CandidateListing, ExistingListing, FuelType, LeaseOffer, Provenance, RejectReason,
    RejectedCandidate, VariantSource,
};
pub use metrics::SessionMetrics;
pub use session::{AppliedCounts, ExtractionSession, SessionState, StateTransition};
