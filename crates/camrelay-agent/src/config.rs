//! Agent configuration.
//!
//! Settings live in `~/.config/camrelay/agent.toml` by default. Every field is
//! optional in the file; durations are written as whole seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use camrelay_core::{duration_secs, resolve_secret};
use camrelay_protocol::{DEFAULT_CHUNK_SIZE, DEFAULT_DEVICE_TOKEN};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AgentError, AgentResult};

/// Path the relay serves device tunnels under.
const TUNNEL_PATH: &str = "api/ws/device";

/// Shortest ping period the agent will use.
pub const MIN_PING_INTERVAL: Duration = Duration::from_secs(1);

/// Agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Id this device registers under.
    pub device_id: String,

    /// Shared secret presented to the relay (`env::` and `pass::` references
    /// are resolved at startup).
    pub device_token: String,

    /// Base URL of the relay, `ws://` or `wss://`.
    pub relay_url: String,

    /// Root holding one directory per camera.
    pub recordings_dir: PathBuf,

    /// Pause between connection attempts.
    #[serde(with = "duration_secs")]
    pub reconnect_delay: Duration,

    /// WebSocket ping period while connected.
    #[serde(with = "duration_secs")]
    pub ping_interval: Duration,

    /// Grace period after a ping interval with nothing from the relay before
    /// the tunnel is treated as dead.
    #[serde(with = "duration_secs")]
    pub ping_timeout: Duration,

    /// Largest payload per binary frame.
    pub chunk_size: usize,

    /// Cameras to register. Empty means every sub-directory of
    /// `recordings_dir`.
    pub cameras: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            device_id: "cam1".to_string(),
            device_token: DEFAULT_DEVICE_TOKEN.to_string(),
            relay_url: "ws://localhost:8000".to_string(),
            recordings_dir: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("recordings"),
            reconnect_delay: Duration::from_secs(5),
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
            chunk_size: DEFAULT_CHUNK_SIZE,
            cameras: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Loads configuration from the default path, or defaults if it is absent.
    pub fn load() -> AgentResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> AgentResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AgentError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(content: &str) -> AgentResult<Self> {
        toml::from_str(content).map_err(|e| {
            AgentError::config(format!("failed to parse config: {e}"))
        })
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("camrelay")
            .join("agent.toml")
    }

    /// Replaces a secret reference in `device_token` with the secret itself.
    pub fn resolve_token(mut self) -> AgentResult<Self> {
        self.device_token = resolve_secret(&self.device_token)
            .map_err(|e| AgentError::config(e.to_string()))?;
        Ok(self)
    }

    /// The tunnel endpoint: `relay_url` plus `/api/ws/device/{device_id}`.
    pub fn tunnel_url(&self) -> AgentResult<Url> {
        let mut url = Url::parse(&self.relay_url).map_err(|e| {
            AgentError::config(format!("invalid relay_url {}: {e}", self.relay_url))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(AgentError::config(format!(
                "relay_url must use ws:// or wss://, got {}",
                url.scheme()
            )));
        }
        if self.device_id.is_empty() {
            return Err(AgentError::config("device_id must not be empty"));
        }

        let path = format!(
            "{}/{}/{}",
            url.path().trim_end_matches('/'),
            TUNNEL_PATH,
            urlencoding::encode(&self.device_id)
        );
        url.set_path(&path);
        Ok(url)
    }

    /// Builder: set the device id.
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    /// Builder: set the device token.
    pub fn with_device_token(mut self, token: impl Into<String>) -> Self {
        self.device_token = token.into();
        self
    }

    /// Builder: set the relay URL.
    pub fn with_relay_url(mut self, url: impl Into<String>) -> Self {
        self.relay_url = url.into();
        self
    }

    /// Builder: set the recordings root.
    pub fn with_recordings_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.recordings_dir = dir.into();
        self
    }

    /// Builder: set the reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Builder: set the keep-alive ping period and the time allowed for the
    /// relay to answer.
    pub fn with_keepalive(mut self, interval: Duration, timeout: Duration) -> Self {
        self.ping_interval = interval;
        self.ping_timeout = timeout;
        self
    }

    /// Time without any inbound frame after which the tunnel is dropped.
    pub fn idle_limit(&self) -> Duration {
        let interval = self.ping_interval.max(MIN_PING_INTERVAL);
        interval + self.ping_timeout
    }

    /// Builder: set the chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Builder: set the cameras to register.
    pub fn with_cameras(mut self, cameras: Vec<String>) -> Self {
        self.cameras = cameras;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.device_id, "cam1");
        assert_eq!(config.device_token, DEFAULT_DEVICE_TOKEN);
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.ping_timeout, Duration::from_secs(10));
        assert_eq!(config.idle_limit(), Duration::from_secs(40));
        assert_eq!(config.chunk_size, 256 * 1024);
        assert!(config.recordings_dir.ends_with("recordings"));
        assert!(config.cameras.is_empty());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = AgentConfig::from_toml(
            r#"
            device_id = "porch"
            relay_url = "wss://relay.example"
            reconnect_delay = 2
            ping_timeout = 5
            cameras = ["front", "back"]
            "#,
        )
        .unwrap();

        assert_eq!(config.device_id, "porch");
        assert_eq!(config.reconnect_delay, Duration::from_secs(2));
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.ping_timeout, Duration::from_secs(5));
        assert_eq!(config.cameras, vec!["front", "back"]);
    }

    #[test]
    fn idle_limit_uses_minimum_ping_interval() {
        let config =
            AgentConfig::default().with_keepalive(Duration::ZERO, Duration::from_secs(2));
        assert_eq!(config.idle_limit(), Duration::from_secs(3));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "chunk_size = 1024\n").unwrap();

        let config = AgentConfig::load_from(&path).unwrap();
        assert_eq!(config.chunk_size, 1024);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = AgentConfig::from_toml("chunk_size = \"big\"").unwrap_err();
        assert!(matches!(err, AgentError::Config { .. }));
    }

    #[test]
    fn tunnel_url_appends_device_path() {
        let url = AgentConfig::default()
            .with_relay_url("ws://relay.local:8000")
            .with_device_id("porch")
            .tunnel_url()
            .unwrap();
        assert_eq!(url.as_str(), "ws://relay.local:8000/api/ws/device/porch");

        let url = AgentConfig::default()
            .with_relay_url("wss://relay.example/base/")
            .with_device_id("garage door")
            .tunnel_url()
            .unwrap();
        assert_eq!(
            url.as_str(),
            "wss://relay.example/base/api/ws/device/garage%20door"
        );
    }

    #[test]
    fn tunnel_url_rejects_bad_input() {
        for config in [
            AgentConfig::default().with_relay_url("http://relay.local"),
            AgentConfig::default().with_relay_url("not a url"),
            AgentConfig::default().with_device_id(""),
        ] {
            assert!(matches!(
                config.tunnel_url(),
                Err(AgentError::Config { .. })
            ));
        }
    }

    #[test]
    fn token_reference_is_resolved() {
        unsafe {
            std::env::set_var("_CAMRELAY_AGENT_TOKEN", "from-env");
        }
        let config = AgentConfig::default()
            .with_device_token("env::_CAMRELAY_AGENT_TOKEN")
            .resolve_token()
            .unwrap();
        assert_eq!(config.device_token, "from-env");
        unsafe {
            std::env::remove_var("_CAMRELAY_AGENT_TOKEN");
        }
    }
}
