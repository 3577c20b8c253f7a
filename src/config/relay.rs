//! Relay configuration
//!
//! Loads relay settings from a TOML file. Every field has a default, so a
//! missing file or a partial one is fine.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default configuration file name
pub const CONFIG_FILE: &str = "relay.toml";

/// Largest header of a masked client frame
pub const MIN_READ_CHUNK_SIZE: usize = 14;

/// Upper bound for a single read (1 MiB)
pub const MAX_READ_CHUNK_SIZE: usize = 1024 * 1024;

/// Errors that can occur during config operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
    /// Bytes read from a socket per attempt
    pub read_chunk_size: usize,
    /// Seconds between maintenance ticks (0 disables the tick)
    pub maintenance_interval_secs: u64,
    /// Remove rooms without members on each maintenance tick
    pub reap_empty_rooms: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
            read_chunk_size: 2048,
            maintenance_interval_secs: 30,
            reap_empty_rooms: false,
        }
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file, falling back to defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind.is_empty() {
            return Err(ConfigError::Invalid("bind cannot be empty".to_string()));
        }
        if !(MIN_READ_CHUNK_SIZE..=MAX_READ_CHUNK_SIZE).contains(&self.read_chunk_size) {
            return Err(ConfigError::Invalid(format!(
                "read_chunk_size must be between {} and {}",
                MIN_READ_CHUNK_SIZE, MAX_READ_CHUNK_SIZE
            )));
        }
        Ok(())
    }

    /// Override the bind address
    pub fn with_bind(mut self, bind: Option<String>) -> Self {
        if let Some(bind) = bind {
            self.bind = bind;
        }
        self
    }

    /// Override the port
    pub fn with_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.port = port;
        }
        self
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Maintenance tick period, if enabled
    pub fn maintenance_interval(&self) -> Option<Duration> {
        (self.maintenance_interval_secs > 0)
            .then(|| Duration::from_secs(self.maintenance_interval_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.socket_addr(), "0.0.0.0:8080");
        assert_eq!(config.read_chunk_size, 2048);
        assert!(!config.reap_empty_rooms);
        assert_eq!(config.maintenance_interval(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let dir = tempdir().unwrap();
        let config = RelayConfig::load(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, RelayConfig::default());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "port = 9100\nreap_empty_rooms = true\n").unwrap();

        let config = RelayConfig::load(&path).unwrap();
        assert_eq!(config.port, 9100);
        assert!(config.reap_empty_rooms);
        assert_eq!(config.bind, "0.0.0.0");
    }

    #[test]
    fn test_parse_error() {
        let result = RelayConfig::from_toml("port = \"not a number\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_invalid_chunk_size() {
        let result = RelayConfig::from_toml("read_chunk_size = 4");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_cli_overrides() {
        let config = RelayConfig::default()
            .with_bind(Some("127.0.0.1".to_string()))
            .with_port(Some(9000));
        assert_eq!(config.socket_addr(), "127.0.0.1:9000");

        let config = RelayConfig::default().with_bind(None).with_port(None);
        assert_eq!(config.socket_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_maintenance_disabled() {
        let config = RelayConfig::from_toml("maintenance_interval_secs = 0").unwrap();
        assert_eq!(config.maintenance_interval(), None);
    }
}
