//! HTTP API handlers for lbm-recon

pub mod audit;
pub mod health;
pub mod sessions;

pub use audit::audit_routes;
pub use health::health_routes;
pub use sessions::session_routes;
