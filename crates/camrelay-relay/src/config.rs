//! Relay configuration.
//!
//! Settings live in `~/.config/camrelay/relay.toml` by default. Every field is
//! optional in the file; missing fields take the defaults below. Durations are
//! written as whole seconds.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camrelay_core::{duration_secs, resolve_secret};
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, RelayResult};

pub use camrelay_protocol::DEFAULT_DEVICE_TOKEN;

/// Relay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address the HTTP and tunnel listener binds to.
    pub bind: SocketAddr,

    /// Shared secret devices must present (`env::` and `pass::` references
    /// are resolved at startup).
    pub device_token: String,

    /// How long a request waits for the device's JSON response.
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    /// How long a file read waits for all of its binary chunks.
    #[serde(with = "duration_secs")]
    pub transfer_timeout: Duration,

    /// Origins allowed by the CORS layer.
    pub cors_origins: Vec<String>,

    /// Frames queued per device before request senders wait.
    pub outbound_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
            device_token: DEFAULT_DEVICE_TOKEN.to_string(),
            request_timeout: Duration::from_secs(60),
            transfer_timeout: Duration::from_secs(60),
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
            ],
            outbound_buffer: 64,
        }
    }
}

impl RelayConfig {
    /// Loads configuration from the default path, or defaults if it is absent.
    pub fn load() -> RelayResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> RelayResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(content: &str) -> RelayResult<Self> {
        toml::from_str(content).map_err(|e| {
            RelayError::config(format!("failed to parse config: {e}"))
        })
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("camrelay")
            .join("relay.toml")
    }

    /// Replaces a secret reference in `device_token` with the secret itself.
    pub fn resolve_token(mut self) -> RelayResult<Self> {
        self.device_token = resolve_secret(&self.device_token)
            .map_err(|e| RelayError::config(e.to_string()))?;
        Ok(self)
    }

    /// Builder: set the bind address.
    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    /// Builder: set the device token.
    pub fn with_device_token(mut self, token: impl Into<String>) -> Self {
        self.device_token = token.into();
        self
    }

    /// Builder: set the response timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Builder: set the binary transfer timeout.
    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    /// Builder: set the CORS origins.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.bind.port(), 8000);
        assert_eq!(config.device_token, DEFAULT_DEVICE_TOKEN);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.transfer_timeout, Duration::from_secs(60));
        assert_eq!(config.cors_origins.len(), 2);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = RelayConfig::from_toml(
            r#"
            bind = "127.0.0.1:9000"
            device_token = "s3cret"
            request_timeout = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.bind, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.device_token, "s3cret");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.transfer_timeout, Duration::from_secs(60));
        assert_eq!(config.outbound_buffer, 64);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = RelayConfig::from_toml("bind = 12").unwrap_err();
        assert!(matches!(err, RelayError::Config { .. }));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "cors_origins = [\"https://cams.example\"]\n").unwrap();

        let config = RelayConfig::load_from(&path).unwrap();
        assert_eq!(config.cors_origins, vec!["https://cams.example"]);
    }

    #[test]
    fn load_from_missing_file_errors() {
        let err = RelayConfig::load_from(Path::new("/nonexistent/relay.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn token_reference_is_resolved() {
        unsafe {
            std::env::set_var("_CAMRELAY_RELAY_TOKEN", "resolved");
        }
        let config = RelayConfig::default()
            .with_device_token("env::_CAMRELAY_RELAY_TOKEN")
            .resolve_token()
            .unwrap();
        assert_eq!(config.device_token, "resolved");
        unsafe {
            std::env::remove_var("_CAMRELAY_RELAY_TOKEN");
        }
    }

    #[test]
    fn builders() {
        let config = RelayConfig::default()
            .with_bind("127.0.0.1:0".parse().unwrap())
            .with_request_timeout(Duration::from_millis(250))
            .with_transfer_timeout(Duration::from_secs(2))
            .with_cors_origins(vec![]);

        assert_eq!(config.bind.port(), 0);
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert_eq!(config.transfer_timeout, Duration::from_secs(2));
        assert!(config.cors_origins.is_empty());
    }
}
