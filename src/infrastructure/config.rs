//! Binary-level bootstrap configuration, loaded once from a TOML file before
//! the OCPP core ever runs. Distinct from `application::config_store`'s
//! runtime `ConfigurationStore`: this is the handful of values the device
//! needs just to reach the CSMS and find its own persistence directory —
//! `HeartbeatInterval`-style OCPP configuration keys live in the store, not
//! here, and survive under `state_dir` once the process is up.
//!
//! Grounded on the teacher's `config.rs`/`AppConfig` TOML-file-with-CLI-
//! override pattern, narrowed from a server's host/port/database/security
//! sections to a charge point's identity/endpoint/persistence sections.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub charge_point: ChargePointConfig,
    #[serde(default)]
    pub csms: CsmsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargePointConfig {
    pub vendor: String,
    pub model: String,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
    pub connector_ids: Vec<u32>,
}

impl Default for ChargePointConfig {
    fn default() -> Self {
        Self {
            vendor: "ocpp-station".to_string(),
            model: "generic-evse".to_string(),
            serial_number: None,
            firmware_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            connector_ids: vec![0, 1],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsmsConfig {
    /// Full `ws://` or `wss://` endpoint, including the charge-point-id path
    /// segment the CSMS expects (e.g. `wss://csms.example.com/ocpp/CP001`).
    pub url: String,
    /// `true` selects `ocpp2.0.1`; `false` (default) selects `ocpp1.6`.
    pub use_ocpp_2_0_1: bool,
}

impl Default for CsmsConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:9000/ocpp/ocpp-station".to_string(),
            use_ocpp_2_0_1: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for every `*.jsn`/`*.cnf` file `spec.md` §6 lists.
    pub state_dir: PathBuf,
    /// Milliseconds between `Context::tick()` calls.
    pub tick_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            tick_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            charge_point: ChargePointConfig::default(),
            csms: CsmsConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// `~/.config/ocpp-station/config.toml`, or `./ocpp-station.toml` if the
/// platform has no config-directory convention.
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .map(|dir| dir.join("ocpp-station").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("ocpp-station.toml"))
}

fn default_state_dir() -> PathBuf {
    dirs_next::data_local_dir()
        .map(|dir| dir.join("ocpp-station"))
        .unwrap_or_else(|| PathBuf::from("./ocpp-station-state"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_connector_ids() {
        let config = AppConfig::default();
        assert_eq!(config.charge_point.connector_ids, vec![0, 1]);
        assert_eq!(config.csms.use_ocpp_2_0_1, false);
    }

    #[test]
    fn parses_a_minimal_toml_document() {
        let toml_text = r#"
            [charge_point]
            vendor = "Acme"
            model = "FastCharge 50kW"

            [csms]
            url = "wss://csms.example.com/ocpp/CP042"
        "#;
        let config: AppConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(config.charge_point.vendor, "Acme");
        assert_eq!(config.csms.url, "wss://csms.example.com/ocpp/CP042");
        // Unspecified sections still fall back to their defaults.
        assert_eq!(config.storage.tick_interval_ms, 1_000);
    }
}
