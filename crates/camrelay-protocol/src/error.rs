//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding tunnel messages.
///
/// None of these are fatal for a connection: receivers log the error and
/// drop the offending frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Text frame is not valid JSON or misses envelope fields.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The `type` tag names no known message.
    #[error("unknown message type: {kind}")]
    UnknownType { kind: String },

    /// The `type` tag is known but the payload does not fit it.
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    /// A correlated message arrived without an `id`.
    #[error("{kind} message is missing its request id")]
    MissingId { kind: String },

    /// Binary frame shorter than the request id prefix.
    #[error("binary frame too short: {len} bytes (need at least {min})")]
    FrameTooShort { len: usize, min: usize },

    /// Binary frame prefix is not a 36-byte textual request id.
    #[error("invalid request id in binary frame")]
    InvalidRequestId,
}

impl ProtocolError {
    /// Creates an unknown type error.
    pub fn unknown_type(kind: impl Into<String>) -> Self {
        Self::UnknownType { kind: kind.into() }
    }

    /// Creates an invalid payload error.
    pub fn invalid_payload(kind: impl Into<String>, source: serde_json::Error) -> Self {
        Self::InvalidPayload {
            kind: kind.into(),
            source,
        }
    }
}
