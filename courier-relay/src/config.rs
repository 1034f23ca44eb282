//! Configuration loading for courier-relay.
//!
//! Configuration is loaded from a TOML file (default: `courier.toml`).
//! Every section and field is optional; missing values take the defaults below.

use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration for courier-relay.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Mailbox relay (TCP) configuration.
    pub relay: RelayConfig,
    /// Key directory storage configuration.
    pub directory: DirectoryConfig,
    /// Perimeter limits for the HTTP surface.
    pub limits: LimitsConfig,
    /// HTTP endpoints configuration.
    pub http: HttpConfig,
}

/// Mailbox relay configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Bind address for the binary relay protocol (default: 0.0.0.0:5000).
    pub bind_address: String,
}

/// Key directory configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Path to SQLite database file.
    pub database: PathBuf,
    /// Reject uploads whose signed prekey is not signed by the identity key (default: true).
    pub enforce_signatures: bool,
}

/// Perimeter limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Requests admitted per source address within one window (default: 60).
    pub requests_per_minute: u32,
    /// Sliding window width in seconds (default: 60).
    pub window_secs: u64,
    /// Aggregate request ceiling across all sources (default: 1000/s).
    pub global_requests_per_second: u32,
    /// Largest accepted request body in bytes (default: 1MB).
    pub max_payload_bytes: usize,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address for HTTP server (default: 0.0.0.0:8000).
    pub bind_address: String,
    /// Enable metrics endpoint (default: true).
    pub metrics_enabled: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5000".to_string(),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("server_keys.db"),
            enforce_signatures: true,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            window_secs: 60,
            global_requests_per_second: 1000,
            max_payload_bytes: 1024 * 1024, // 1MB
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            metrics_enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails [`Config::validate`].
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would disable a limit by accident.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.limits;
        if limits.requests_per_minute == 0 {
            return Err(ConfigError::Invalid("limits.requests_per_minute must be > 0"));
        }
        if limits.window_secs == 0 {
            return Err(ConfigError::Invalid("limits.window_secs must be > 0"));
        }
        if limits.global_requests_per_second == 0 {
            return Err(ConfigError::Invalid(
                "limits.global_requests_per_second must be > 0",
            ));
        }
        if limits.max_payload_bytes == 0 {
            return Err(ConfigError::Invalid("limits.max_payload_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.relay.bind_address, "0.0.0.0:5000");
        assert_eq!(config.http.bind_address, "0.0.0.0:8000");
        assert_eq!(config.limits.requests_per_minute, 60);
        assert_eq!(config.limits.max_payload_bytes, 1024 * 1024);
        assert!(config.directory.enforce_signatures);
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[relay]
bind_address = "127.0.0.1:6000"

[directory]
database = "/data/keys.db"
enforce_signatures = false

[limits]
requests_per_minute = 10
max_payload_bytes = 4096

[http]
bind_address = "0.0.0.0:9090"
metrics_enabled = false
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.relay.bind_address, "127.0.0.1:6000");
        assert_eq!(config.directory.database, PathBuf::from("/data/keys.db"));
        assert!(!config.directory.enforce_signatures);
        assert_eq!(config.limits.requests_per_minute, 10);
        assert_eq!(config.limits.window_secs, 60);
        assert_eq!(config.limits.max_payload_bytes, 4096);
        assert_eq!(config.http.bind_address, "0.0.0.0:9090");
        assert!(!config.http.metrics_enabled);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.directory.database, PathBuf::from("server_keys.db"));
        assert_eq!(config.limits.global_requests_per_second, 1000);
    }

    #[test]
    fn zero_limits_are_rejected() {
        let mut config = Config::default();
        config.limits.requests_per_minute = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.limits.max_payload_bytes = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn from_file_reports_missing_path() {
        let err = Config::from_file(std::path::Path::new("/nonexistent/courier.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.toml");
        std::fs::write(&path, "[limits]\nrequests_per_minute = 5\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.limits.requests_per_minute, 5);
    }
}
