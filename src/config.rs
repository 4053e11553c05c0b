//! On-disk configuration for mqttdeck.
//!
//! Loaded once at startup from `<config_dir>/mqttdeck/config.toml`. A missing or
//! unparseable file falls back to the built-in defaults so the tool always starts.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_SUB_BIN: &str = "mosquitto_sub";
pub const DEFAULT_PUB_BIN: &str = "mosquitto_pub";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Default broker host used when `connect` gives none.
    pub host: String,
    /// Default broker port used when `connect` gives none.
    pub port: u16,
    /// Route every subscription line into the aggregated console sink.
    pub use_console: bool,
    /// Subscribe-mode client binary.
    pub subscribe_bin: String,
    /// Publish-mode client binary.
    pub publish_bin: String,
    /// Opaque options appended to every client invocation, in order.
    pub client_opts: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            use_console: true,
            subscribe_bin: DEFAULT_SUB_BIN.to_string(),
            publish_bin: DEFAULT_PUB_BIN.to_string(),
            client_opts: Vec::new(),
        }
    }
}

impl Config {
    /// Loads the configuration file, falling back to defaults on any failure.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            warn!("No config directory available, using default configuration");
            return Self::default();
        };

        match fs::read_to_string(&path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                debug!("No config file at {} ({}), using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mqttdeck").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_broker_fallbacks() {
        let config = Config::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 1883);
        assert_eq!(config.subscribe_bin, "mosquitto_sub");
        assert_eq!(config.publish_bin, "mosquitto_pub");
        assert!(config.use_console);
        assert!(config.client_opts.is_empty());
    }

    #[test]
    fn partial_file_fills_missing_fields_from_defaults() {
        let config: Config = toml::from_str("port = 8883\nuse_console = false\n").unwrap();
        assert_eq!(config.port, 8883);
        assert!(!config.use_console);
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.subscribe_bin, DEFAULT_SUB_BIN);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = Config {
            host: "broker.local".to_string(),
            port: 1884,
            use_console: false,
            subscribe_bin: "mosquitto_sub".to_string(),
            publish_bin: "mosquitto_pub".to_string(),
            client_opts: vec!["-q".to_string(), "1".to_string()],
        };
        let raw = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&raw).unwrap();
        assert_eq!(parsed, config);
    }
}
