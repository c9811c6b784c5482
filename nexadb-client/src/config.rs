//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (`--config`, or NEXADB_CONFIG for the CLI)
//! 3. Environment variables

use nexadb_protocol::{DEFAULT_PORT, MAX_PAYLOAD_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Connection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Username sent in the handshake.
    pub username: Option<String>,
    /// Password sent in the handshake.
    pub password: Option<String>,
    /// Client name sent in the handshake.
    pub client_name: String,
    /// Database used by the convenience calls when none is given.
    pub database: String,
    /// Connect and per-exchange timeout in milliseconds.
    pub timeout_ms: u64,
    /// Largest reply payload accepted, in bytes.
    pub max_payload_size: u32,
    /// How often the change-stream receiver checks for cancellation.
    pub watch_poll_interval_ms: u64,
    /// How long shutdown waits for the change-stream receiver to exit.
    pub watch_join_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            client_name: "nexadb-rust".to_string(),
            database: "default".to_string(),
            timeout_ms: 30_000,
            max_payload_size: MAX_PAYLOAD_SIZE,
            watch_poll_interval_ms: 1000,
            watch_join_timeout_ms: 2000,
        }
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = (timeout.as_millis() as u64).max(1);
        self
    }

    pub fn with_max_payload_size(mut self, bytes: u32) -> Self {
        self.max_payload_size = bytes;
        self
    }

    pub fn with_watch_poll_interval(mut self, interval: Duration) -> Self {
        self.watch_poll_interval_ms = (interval.as_millis() as u64).max(1);
        self
    }

    /// Returns `host:port` for the socket connect.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn watch_poll_interval(&self) -> Duration {
        Duration::from_millis(self.watch_poll_interval_ms)
    }

    pub fn watch_join_timeout(&self) -> Duration {
        Duration::from_millis(self.watch_join_timeout_ms)
    }

    /// Loads `path` (or the defaults) and applies environment overrides.
    ///
    /// Not validated, so callers can layer further settings on top first.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::layered(path, |key| std::env::var(key).ok())
    }

    fn layered(
        path: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(lookup);
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: ConnectionConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Applies NEXADB_* overrides. NEXADB_TIMEOUT is in seconds and may be
    /// fractional. Unparseable values are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("NEXADB_HOST") {
            self.host = host;
        }

        if let Some(port) = lookup("NEXADB_PORT") {
            if let Ok(parsed) = port.parse() {
                self.port = parsed;
            }
        }

        if let Some(username) = lookup("NEXADB_USERNAME") {
            self.username = Some(username);
        }

        if let Some(password) = lookup("NEXADB_PASSWORD") {
            self.password = Some(password);
        }

        if let Some(database) = lookup("NEXADB_DATABASE") {
            self.database = database;
        }

        if let Some(timeout) = lookup("NEXADB_TIMEOUT") {
            match timeout.parse::<f64>() {
                Ok(secs) if secs.is_finite() && secs > 0.0 => {
                    self.timeout_ms = ((secs * 1000.0).round() as u64).max(1);
                }
                _ => {}
            }
        }

        if let Some(max) = lookup("NEXADB_MAX_PAYLOAD_SIZE") {
            if let Ok(parsed) = max.parse() {
                self.max_payload_size = parsed;
            }
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Validation("host must not be empty".into()));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "timeout_ms must be greater than zero".into(),
            ));
        }
        if self.watch_poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "watch_poll_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file '{}': {1}", .0.display())]
    Parse(PathBuf, String),

    #[error("invalid configuration: {0}")]
    Validation(String),
}
