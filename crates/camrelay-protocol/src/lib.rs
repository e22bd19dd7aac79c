//! Wire protocol spoken between the relay and edge devices.
//!
//! A device holds one WebSocket to the relay. Over it the relay sends
//! requests and the device answers, all multiplexed by request id.
//!
//! # Handshake
//!
//! The first text frame from the device is an [`AuthMessage`]
//! (`{"token": "..."}`). A frame that does not parse closes the socket with
//! [`CLOSE_AUTH_MALFORMED`]; a wrong token closes it with
//! [`CLOSE_AUTH_FAILED`].
//!
//! # Envelopes
//!
//! Every later text frame is a JSON [`WireEnvelope`]:
//!
//! ```json
//! {"id": "<uuid>", "type": "LIST_VIDEOS", "payload": {"camera": "cam1"}}
//! ```
//!
//! Requests ([`Request`]) flow relay to device, responses ([`Response`])
//! flow back with the same `id`. `REGISTER_CAMERAS` ([`Control`]) has no
//! `id`. A `READ_FILE_RES` is followed by binary chunk frames, see
//! [`encode_chunk`].
//!
//! # Example
//!
//! ```rust
//! use camrelay_protocol::{Envelope, ListVideosQuery, Request};
//!
//! let request = Envelope::request(Request::ListVideos(ListVideosQuery::new("cam1")));
//! let text = request.to_json().unwrap();
//! let decoded: Envelope<Request> = Envelope::decode(&text).unwrap();
//! assert_eq!(decoded.id, request.id);
//! ```

mod error;
mod frame;
mod types;

pub use error::{ProtocolError, ProtocolResult};
pub use frame::{Frame, decode_chunk, encode_chunk};
pub use types::{
    AuthMessage, Body, CameraList, Control, DeviceMessage, Envelope, ErrorBody, ErrorCode,
    FileRange, ListVideosQuery, MessageType, ReadFileRequest, Request, Response, VideoPage,
    WireEnvelope, new_request_id,
};

/// Length of a textual request id and of the binary frame prefix.
pub const REQUEST_ID_LEN: usize = 36;

/// Bytes per binary chunk a device sends by default.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Shared token both sides fall back to when none is configured. Only
/// suitable for local testing.
pub const DEFAULT_DEVICE_TOKEN: &str = "default-insecure-token";

/// Close code: the auth frame could not be parsed.
pub const CLOSE_AUTH_MALFORMED: u16 = 4000;

/// Close code: the auth token was wrong.
pub const CLOSE_AUTH_FAILED: u16 = 4001;
