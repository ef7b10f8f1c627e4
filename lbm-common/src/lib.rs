//! # LBM Common Library
//!
//! Shared code for the LBM (leasing marketplace) backend services:
//! - Common error type wrapping database and IO failures
//! - Configuration loading and root folder resolution

pub mod config;
pub mod error;

pub use error::{Error, Result};
