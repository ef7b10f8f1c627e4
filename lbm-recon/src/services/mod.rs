//! Reconciliation pipeline services
//!
//! The pipeline runs normalizer → matcher → classifier, all pure and
//! synchronous; the session manager orchestrates them against storage and
//! the apply engine commits approved changes.

pub mod apply_engine;
pub mod classifier;
pub mod extraction_client;
pub mod matcher;
pub mod metrics;
pub mod normalizer;
pub mod session_manager;

pub use extraction_client::{ExtractionProvider, HttpExtractionClient};
pub use matcher::{ListingMatcher, MatchResult};
pub use session_manager::SessionManager;
