//! Agent error types.

use std::io;
use std::time::Duration;

use camrelay_protocol::ProtocolError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors that can occur in the agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// IO error (config file, recordings).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Protocol error (encoding a reply).
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The relay closed the tunnel during or right after the handshake.
    #[error("Relay rejected the device ({code}): {reason}")]
    AuthRejected { code: u16, reason: String },

    /// Nothing arrived from the relay, not even a pong, for too long.
    #[error("No frames from the relay for {}s", .silent_for.as_secs())]
    RelaySilent { silent_for: Duration },

    /// The frame writer stopped before a reply was fully queued.
    #[error("Tunnel closed while sending")]
    TunnelClosed,
}

impl AgentError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
