//! TOML Configuration File Support
//!
//! Loads the relay configuration from `$XDG_CONFIG_HOME/skylink/skylink.toml`
//! (typically `~/.config/skylink/skylink.toml`). Values are taken, highest
//! priority first, from:
//! 1. Environment variables (`SKYLINK_TCP_PORT`, `SKYLINK_UDP_PORT`,
//!    `SKYLINK_BUFFER_CAPACITY`)
//! 2. The TOML file
//! 3. Defaults
//!
//! # Example Configuration
//!
//! ```toml
//! [transport]
//! connection_kind = "stream"
//! reconnection_timeout_ms = 1000
//! maximum_reconnects = 100
//! connection = { kind = "tcp", host = "127.0.0.1", port = 7000 }
//!
//! [buffer]
//! capacity = 10
//!
//! [[mappings]]
//! name = "command"
//! tag = 13
//! class_name = "CommandData"
//! advertise = true
//!
//! [tcp]
//! port = 7000
//!
//! [udp]
//! port = 7001
//! receive_timeout_ms = 500
//! client_timeout_ms = 10000
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapter::{MappingConfig, MappingError, MappingTable};
use crate::listener::{TcpListenerConfig, UdpListenerConfig};
use crate::message::MessageRegistry;
use crate::transport::{BufferConfig, TransportConfig};

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Complete relay configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkylinkConfig {
    /// Uplink the daemon dials when `connection` is set
    pub transport: TransportConfig,
    /// Outbound queue of buffered transports
    pub buffer: BufferConfig,
    /// Frame type to message type mappings
    pub mappings: Vec<MappingConfig>,
    /// TCP listener service
    pub tcp: TcpListenerConfig,
    /// UDP listener service
    pub udp: UdpListenerConfig,
}

impl SkylinkConfig {
    /// Parse a TOML document
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] for malformed TOML or unknown
    /// enum values.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Check values serde cannot
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "buffer.capacity must be at least 1".to_string(),
            ));
        }
        if self.tcp.max_peers == 0 {
            return Err(ConfigError::ValidationError(
                "tcp.max_peers must be at least 1".to_string(),
            ));
        }
        if self.udp.receive_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "udp.receive_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the mapping table against `registry`
    ///
    /// # Errors
    ///
    /// Returns the first invalid mapping.
    pub fn mapping_table(&self, registry: &MessageRegistry) -> Result<MappingTable, MappingError> {
        MappingTable::build(&self.mappings, registry)
    }

    /// Apply environment overrides read through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = parse_env(&lookup, "SKYLINK_TCP_PORT") {
            self.tcp.port = port;
        }
        if let Some(port) = parse_env(&lookup, "SKYLINK_UDP_PORT") {
            self.udp.port = port;
        }
        if let Some(capacity) = parse_env(&lookup, "SKYLINK_BUFFER_CAPACITY") {
            self.buffer.capacity = capacity;
        }
    }
}

fn parse_env<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/skylink/skylink.toml` or
/// `~/.config/skylink/skylink.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("skylink").join("skylink.toml"))
}

/// Load configuration from the default path and the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed or
/// fails validation. A missing config file is not an error.
pub fn load_config() -> Result<SkylinkConfig, ConfigError> {
    let mut config = match default_config_path() {
        Some(path) if path.exists() => read_config_file(&path)?,
        Some(path) => {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            SkylinkConfig::default()
        }
        None => SkylinkConfig::default(),
    };
    config.apply_env_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Load configuration from a specific file, then apply the environment
///
/// Unlike [`load_config`], the file must exist.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed or validated.
pub fn load_config_from_path(path: impl AsRef<Path>) -> Result<SkylinkConfig, ConfigError> {
    let mut config = read_config_file(path.as_ref())?;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<SkylinkConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;
    let config = SkylinkConfig::from_toml_str(&content)?;
    tracing::info!(
        path = %path.display(),
        mappings = config.mappings.len(),
        "Loaded configuration from file"
    );
    Ok(config)
}
