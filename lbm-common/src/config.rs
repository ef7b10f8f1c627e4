//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Service configuration persisted as TOML
///
/// Lives at `<config dir>/lbm/<service>.toml`. All fields optional;
/// missing values fall back to environment variables or compiled defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root data folder (database lives here)
    pub root_folder: Option<String>,
    /// Listen port for the service's HTTP API
    pub port: Option<u16>,
    /// Base URL for the external extraction service
    pub extractor_url: Option<String>,
    /// API key for the external extraction service
    pub extractor_api_key: Option<String>,
}

/// Root folder resolution priority order:
/// 1. Environment variable (highest priority)
/// 2. TOML config file
/// 3. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(env_var_name: &str, service: &str) -> PathBuf {
    // Priority 1: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        return PathBuf::from(path);
    }

    // Priority 2: TOML config file
    if let Ok(config) = load_toml_config(service) {
        if let Some(root_folder) = config.root_folder {
            return PathBuf::from(root_folder);
        }
    }

    // Priority 3: OS-dependent compiled default
    default_root_folder()
}

/// Path of the per-service TOML config file for this platform
pub fn config_file_path(service: &str) -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("lbm").join(format!("{}.toml", service)))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
}

/// Load the per-service TOML config, if present
pub fn load_toml_config(service: &str) -> Result<TomlConfig> {
    let path = config_file_path(service)?;
    if !path.exists() {
        return Ok(TomlConfig::default());
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Write the per-service TOML config (creates parent directory if missing)
pub fn write_toml_config(config: &TomlConfig, path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("lbm"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/lbm"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("lbm"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/lbm"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("lbm"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\lbm"))
    } else {
        PathBuf::from("./lbm_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lbm").join("recon.toml");

        let config = TomlConfig {
            root_folder: Some("/srv/lbm".to_string()),
            port: Some(6100),
            extractor_url: Some("http://localhost:9000".to_string()),
            extractor_api_key: None,
        };
        write_toml_config(&config, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: TomlConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed.root_folder.as_deref(), Some("/srv/lbm"));
        assert_eq!(parsed.port, Some(6100));
        assert_eq!(parsed.extractor_url.as_deref(), Some("http://localhost:9000"));
        assert!(parsed.extractor_api_key.is_none());
    }

    #[test]
    fn env_var_takes_priority() {
        std::env::set_var("LBM_TEST_ROOT", "/tmp/lbm-test-root");
        let resolved = resolve_root_folder("LBM_TEST_ROOT", "recon");
        assert_eq!(resolved, PathBuf::from("/tmp/lbm-test-root"));
        std::env::remove_var("LBM_TEST_ROOT");
    }
}
