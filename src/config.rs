//! # Configuration Management
//!
//! Centralized configuration for the discovery service.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` or strings via `from_toml()`
//! - `DISCOVERY_*` environment variables via `from_env()`
//! - Direct instantiation with defaults
//!
//! Durations are written in milliseconds.

use crate::error::{DiscoveryError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Idle time after which a session is destroyed
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(180);

/// Time a request waits for its response
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub const DEFAULT_MAX_REQUESTS_PER_SESSION: usize = 16;
pub const DEFAULT_MAX_DECRYPT_FAILURES: u32 = 2;
pub const DEFAULT_MAX_NODES_PER_MESSAGE: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_WORKERS: usize = 8;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DiscoveryConfig {
    /// Session and request lifecycle
    #[serde(default)]
    pub session: SessionConfig,

    /// Socket and pipeline sizing
    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DiscoveryConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| DiscoveryError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| DiscoveryError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| DiscoveryError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("DISCOVERY_LISTEN_ADDRESS") {
            config.transport.listen_address = addr;
        }

        if let Ok(timeout) = std::env::var("DISCOVERY_SESSION_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.session.session_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(timeout) = std::env::var("DISCOVERY_REQUEST_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.session.request_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(workers) = std::env::var("DISCOVERY_WORKERS") {
            if let Ok(val) = workers.parse::<usize>() {
                config.transport.workers = val;
            }
        }

        if let Ok(capacity) = std::env::var("DISCOVERY_QUEUE_CAPACITY") {
            if let Ok(val) = capacity.parse::<usize>() {
                config.transport.queue_capacity = val;
            }
        }

        if let Ok(level) = std::env::var("DISCOVERY_LOG_LEVEL") {
            if let Ok(val) = level.parse::<Level>() {
                config.logging.log_level = val;
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.session.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(DiscoveryError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Session and request lifecycle configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Inactivity period after which a session is destroyed
    #[serde(with = "duration_serde")]
    pub session_timeout: Duration,

    /// How long an in-flight request waits for its response
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,

    /// Upper bound on concurrently in-flight requests per session
    pub max_requests_per_session: usize,

    /// Consecutive decrypt failures tolerated before an established session is reset
    pub max_decrypt_failures: u32,

    /// Records per NODES message when answering FINDNODE
    pub max_nodes_per_message: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_requests_per_session: DEFAULT_MAX_REQUESTS_PER_SESSION,
            max_decrypt_failures: DEFAULT_MAX_DECRYPT_FAILURES,
            max_nodes_per_message: DEFAULT_MAX_NODES_PER_MESSAGE,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.session_timeout.as_millis() < 100 {
            errors.push("Session timeout too short (minimum: 100ms)".to_string());
        } else if self.session_timeout.as_secs() > 24 * 3600 {
            errors.push("Session timeout too long (maximum: 24 hours)".to_string());
        }

        if self.request_timeout.as_millis() < 10 {
            errors.push("Request timeout too short (minimum: 10ms)".to_string());
        } else if self.request_timeout > self.session_timeout {
            errors.push("Request timeout cannot exceed session timeout".to_string());
        }

        if self.max_requests_per_session == 0 {
            errors.push("Max requests per session must be greater than 0".to_string());
        } else if self.max_requests_per_session > 1024 {
            errors.push(format!(
                "Max requests per session too large: {} (maximum: 1024)",
                self.max_requests_per_session
            ));
        }

        if self.max_decrypt_failures == 0 {
            errors.push("Max decrypt failures must be greater than 0".to_string());
        }

        if self.max_nodes_per_message == 0 {
            errors.push("Max nodes per message must be greater than 0".to_string());
        } else if self.max_nodes_per_message > 4 {
            errors.push(format!(
                "Max nodes per message too large: {} (maximum: 4)",
                self.max_nodes_per_message
            ));
        }

        errors
    }
}

/// Socket and pipeline sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// UDP listen address (e.g., "0.0.0.0:9000")
    pub listen_address: String,

    /// Capacity of each pipeline queue; pushes beyond it are dropped
    pub queue_capacity: usize,

    /// Envelopes processed concurrently per pipeline
    pub workers: usize,

    /// Capacity of the outbound datagram channel
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

fn default_outbound_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen_address: String::from("0.0.0.0:9000"),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: DEFAULT_WORKERS,
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.listen_address.is_empty() {
            errors.push("Listen address cannot be empty".to_string());
        } else if self.listen_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid listen address format: '{}' (expected format: '0.0.0.0:9000')",
                self.listen_address
            ));
        }

        if self.queue_capacity == 0 {
            errors.push("Queue capacity must be greater than 0".to_string());
        } else if self.queue_capacity > 1_000_000 {
            errors.push(format!(
                "Queue capacity too large: {} (max recommended: 1,000,000)",
                self.queue_capacity
            ));
        }

        if self.workers == 0 {
            errors.push("Worker count must be greater than 0".to_string());
        } else if self.workers > 1024 {
            errors.push(format!("Worker count too large: {} (maximum: 1024)", self.workers));
        }

        if self.outbound_capacity == 0 {
            errors.push("Outbound capacity must be greater than 0".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("discovery-protocol"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
