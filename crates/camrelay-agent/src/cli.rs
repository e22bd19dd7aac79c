//! Command-line interface definition.

use std::path::PathBuf;

use clap::Parser;

use crate::config::AgentConfig;

/// camrelay-agent - Serves local camera recordings through a camrelay relay
#[derive(Debug, Parser)]
#[command(name = "camrelay-agent")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "CAMRELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Relay base URL (ws:// or wss://)
    #[arg(long)]
    pub relay_url: Option<String>,

    /// Id this device registers under
    #[arg(long)]
    pub device_id: Option<String>,

    /// Shared device token (`env::VAR` and `pass::path` references allowed)
    #[arg(long, env = "CAMRELAY_DEVICE_TOKEN", hide_env_values = true)]
    pub device_token: Option<String>,

    /// Directory holding one sub-directory per camera
    #[arg(long)]
    pub recordings_dir: Option<PathBuf>,

    /// Camera to register (can be repeated; default: discover)
    #[arg(long = "camera", action = clap::ArgAction::Append)]
    pub cameras: Vec<String>,
}

impl Cli {
    /// Applies command-line overrides on top of a loaded configuration.
    pub fn apply(&self, mut config: AgentConfig) -> AgentConfig {
        if let Some(ref url) = self.relay_url {
            config = config.with_relay_url(url);
        }
        if let Some(ref id) = self.device_id {
            config = config.with_device_id(id);
        }
        if let Some(ref token) = self.device_token {
            config = config.with_device_token(token);
        }
        if let Some(ref dir) = self.recordings_dir {
            config = config.with_recordings_dir(dir);
        }
        if !self.cameras.is_empty() {
            config = config.with_cameras(self.cameras.clone());
        }
        config
    }
}
