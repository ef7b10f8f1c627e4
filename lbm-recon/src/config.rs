//! Service configuration
//!
//! Layered like the other services: environment variables override the
//! per-service TOML file, which overrides built-in defaults.

use lbm_common::config::load_toml_config;
use lbm_common::Result;

/// Default listen port for lbm-recon
pub const DEFAULT_PORT: u16 = 5741;

/// Default extraction service endpoint
pub const DEFAULT_EXTRACTOR_URL: &str = "http://127.0.0.1:5742";

#[derive(Debug, Clone)]
pub struct ReconConfig {
    pub port: u16,
    pub extractor_url: String,
    pub extractor_api_key: Option<String>,
}

impl ReconConfig {
    /// Load configuration: env > TOML > defaults
    pub fn load() -> Result<Self> {
        let toml = load_toml_config("recon").unwrap_or_default();

        let port = std::env::var("LBM_RECON_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .or(toml.port)
            .unwrap_or(DEFAULT_PORT);

        let extractor_url = std::env::var("LBM_EXTRACTOR_URL")
            .ok()
            .or(toml.extractor_url)
            .unwrap_or_else(|| DEFAULT_EXTRACTOR_URL.to_string());

        let extractor_api_key = std::env::var("LBM_EXTRACTOR_API_KEY")
            .ok()
            .or(toml.extractor_api_key);

        Ok(Self {
            port,
            extractor_url,
            extractor_api_key,
        })
    }
}
