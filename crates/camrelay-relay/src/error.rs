//! Relay error types.

use std::io;
use std::time::Duration;

use camrelay_protocol::{ErrorBody, ProtocolError};
use thiserror::Error;

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// Errors that can occur in the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// IO error (listener bind, config file).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Protocol error (encoding a request).
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// No connected device serves the requested camera or device id.
    #[error("Device or camera not found: {id}")]
    DeviceNotFound { id: String },

    /// No response arrived before the deadline.
    #[error("Request {request_id} timed out after {}s", timeout.as_secs())]
    RequestTimeout {
        request_id: String,
        timeout: Duration,
    },

    /// The device went away while the request was pending.
    #[error("Device {device_id} disconnected")]
    DeviceDisconnected { device_id: String },

    /// A request id collided with one still pending on the connection.
    #[error("Request id {request_id} is already pending")]
    DuplicateRequestId { request_id: String },

    /// The device answered with an ERROR envelope.
    #[error("Device error: {0}")]
    Device(ErrorBody),

    /// Fewer bytes arrived than the device declared.
    #[error("Incomplete transfer: received {received} of {expected} bytes")]
    IncompleteTransfer { expected: u64, received: u64 },

    /// More bytes arrived than the device declared.
    #[error("Transfer overrun: got {received} bytes, {expected} declared")]
    TransferOverrun { expected: u64, received: u64 },

    /// The device answered with a response type that does not fit the request.
    #[error("Unexpected {kind} response from device")]
    UnexpectedResponse { kind: String },
}

impl RelayError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a device not found error.
    pub fn device_not_found(id: impl Into<String>) -> Self {
        Self::DeviceNotFound { id: id.into() }
    }

    /// Creates a device disconnected error.
    pub fn disconnected(device_id: impl Into<String>) -> Self {
        Self::DeviceDisconnected {
            device_id: device_id.into(),
        }
    }

    /// Creates an unexpected response error.
    pub fn unexpected(kind: impl Into<String>) -> Self {
        Self::UnexpectedResponse { kind: kind.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camrelay_protocol::ErrorCode;

    #[test]
    fn device_error_includes_device_message() {
        let err = RelayError::Device(ErrorBody::new(
            ErrorCode::FileNotFound,
            "File not found: a.mp4",
        ));
        assert_eq!(
            err.to_string(),
            "Device error: Recording not found: File not found: a.mp4"
        );
    }

    #[test]
    fn transfer_length_messages() {
        let short = RelayError::IncompleteTransfer {
            expected: 10,
            received: 4,
        };
        assert_eq!(
            short.to_string(),
            "Incomplete transfer: received 4 of 10 bytes"
        );
        let long = RelayError::TransferOverrun {
            expected: 10,
            received: 12,
        };
        assert_eq!(
            long.to_string(),
            "Transfer overrun: got 12 bytes, 10 declared"
        );
    }

    #[test]
    fn timeout_message_names_request() {
        let err = RelayError::RequestTimeout {
            request_id: "abc".to_string(),
            timeout: Duration::from_secs(60),
        };
        assert_eq!(err.to_string(), "Request abc timed out after 60s");
    }
}
