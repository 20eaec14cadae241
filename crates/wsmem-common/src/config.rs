//! Server configuration
//!
//! TOML-backed configuration for the wsmem server binary. Every field has a
//! default so a partial file (or no file at all) is valid.

use crate::error::{Error, Result};
use crate::logging::LogConfig;
use crate::proto::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

/// Transport server and worker-endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the listener
    #[serde(default = "default_bind")]
    pub bind: String,

    /// TCP port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Accept-poll interval in milliseconds; bounds how long a shutdown
    /// request can go unnoticed
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// WebSocket URL of the peer the job worker talks to. Jobs execute
    /// against local process primitives when unset.
    #[serde(default)]
    pub peer_url: Option<String>,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_poll_interval_ms() -> u64 {
    50
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            poll_interval_ms: default_poll_interval_ms(),
            peer_url: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("failed to parse config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.server.poll_interval_ms, 50);
        assert!(config.server.peer_url.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
            [server]
            bind = "0.0.0.0"
            port = 9010
            peer_url = "ws://127.0.0.1:9001"

            [logging]
            level = "debug"
        "#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.port, 9010);
        assert_eq!(
            config.server.peer_url.as_deref(),
            Some("ws://127.0.0.1:9001")
        );
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_from_toml_partial_uses_defaults() {
        let config = Config::from_toml("[server]\nport = 19001\n").unwrap();
        assert_eq!(config.server.port, 19001);
        assert_eq!(config.server.poll_interval_ms, 50);
    }

    #[test]
    fn test_from_toml_invalid() {
        assert!(Config::from_toml("server = 12").is_err());
    }
}
