//! Tunnel message types and the JSON envelope boundary.
//!
//! Every text frame on the tunnel is a [`WireEnvelope`]: an optional `id`, a
//! `type` tag and a free-form `payload`. Receivers parse that shape first and
//! then lift it into one of the typed bodies ([`Request`], [`Response`],
//! [`Control`]) in a single step, so an unknown `type` can still be answered
//! with the `id` it arrived with.

use std::fmt;

use camrelay_core::{Page, VideoFilter, VideoInfo};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ProtocolError, ProtocolResult};

/// Generates a fresh request id (hyphenated UUID v4, always 36 bytes).
pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Every `type` tag the protocol knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Relay asks for a recording listing.
    ListVideos,
    /// Relay asks for a byte range of a recording.
    ReadFile,
    /// Device announces its cameras (uncorrelated control message).
    RegisterCameras,
    /// Device answers `LIST_VIDEOS`.
    ListVideosRes,
    /// Device answers `READ_FILE`; binary frames follow.
    ReadFileRes,
    /// Device reports a failure for a request.
    Error,
}

impl MessageType {
    const ALL: [MessageType; 6] = [
        Self::ListVideos,
        Self::ReadFile,
        Self::RegisterCameras,
        Self::ListVideosRes,
        Self::ReadFileRes,
        Self::Error,
    ];

    /// Wire spelling of the tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ListVideos => "LIST_VIDEOS",
            Self::ReadFile => "READ_FILE",
            Self::RegisterCameras => "REGISTER_CAMERAS",
            Self::ListVideosRes => "LIST_VIDEOS_RES",
            Self::ReadFileRes => "READ_FILE_RES",
            Self::Error => "ERROR",
        }
    }

    /// Looks a tag up by its wire spelling.
    pub fn parse(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == kind)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The untyped JSON shape of every text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope {
    /// Request id; absent on control messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Raw `type` tag, kept as a string so unknown tags survive parsing.
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific body.
    #[serde(default)]
    pub payload: Value,
}

impl WireEnvelope {
    /// Parses a text frame.
    pub fn parse(text: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serializes to a text frame.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The tag, if it is one the protocol knows.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::parse(&self.kind)
    }

    fn payload_as<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        T::deserialize(&self.payload).map_err(|e| ProtocolError::invalid_payload(&self.kind, e))
    }

    fn require_id(&self) -> ProtocolResult<String> {
        self.id.clone().ok_or_else(|| ProtocolError::MissingId {
            kind: self.kind.clone(),
        })
    }
}

/// A typed message body that travels inside an [`Envelope`].
pub trait Body: Sized {
    /// Tag written to the wire.
    fn message_type(&self) -> MessageType;

    /// Payload written to the wire.
    fn to_payload(&self) -> ProtocolResult<Value>;

    /// Lifts a parsed wire envelope into this body type.
    fn from_wire(wire: &WireEnvelope) -> ProtocolResult<Self>;
}

/// A correlated message: request id plus typed body.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    /// Request id shared by a request, its response and its binary chunks.
    pub id: String,
    /// Typed body.
    pub body: T,
}

impl<T> Envelope<T> {
    /// Creates an envelope with an explicit id.
    pub fn new(id: impl Into<String>, body: T) -> Self {
        Self {
            id: id.into(),
            body,
        }
    }
}

impl Envelope<Request> {
    /// Creates a request envelope with a freshly generated id.
    pub fn request(body: Request) -> Self {
        Self::new(new_request_id(), body)
    }
}

impl<T: Body> Envelope<T> {
    /// Converts to the untyped wire shape.
    pub fn to_wire(&self) -> ProtocolResult<WireEnvelope> {
        Ok(WireEnvelope {
            id: Some(self.id.clone()),
            kind: self.body.message_type().as_str().to_string(),
            payload: self.body.to_payload()?,
        })
    }

    /// Serializes to a text frame.
    pub fn to_json(&self) -> ProtocolResult<String> {
        self.to_wire()?.to_json()
    }

    /// Lifts a parsed wire envelope, requiring an id.
    pub fn from_wire(wire: &WireEnvelope) -> ProtocolResult<Self> {
        let id = wire.require_id()?;
        Ok(Self::new(id, T::from_wire(wire)?))
    }

    /// Parses and lifts a text frame.
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        Self::from_wire(&WireEnvelope::parse(text)?)
    }
}

/// Requests the relay sends to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// List recordings of one camera.
    ListVideos(ListVideosQuery),
    /// Read a byte range of one recording.
    ReadFile(ReadFileRequest),
}

impl Body for Request {
    fn message_type(&self) -> MessageType {
        match self {
            Self::ListVideos(_) => MessageType::ListVideos,
            Self::ReadFile(_) => MessageType::ReadFile,
        }
    }

    fn to_payload(&self) -> ProtocolResult<Value> {
        let value = match self {
            Self::ListVideos(query) => serde_json::to_value(query)?,
            Self::ReadFile(read) => serde_json::to_value(read)?,
        };
        Ok(value)
    }

    fn from_wire(wire: &WireEnvelope) -> ProtocolResult<Self> {
        match wire.message_type() {
            Some(MessageType::ListVideos) => Ok(Self::ListVideos(wire.payload_as()?)),
            Some(MessageType::ReadFile) => Ok(Self::ReadFile(wire.payload_as()?)),
            _ => Err(ProtocolError::unknown_type(&wire.kind)),
        }
    }
}

/// `LIST_VIDEOS` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListVideosQuery {
    /// Camera whose recordings are listed.
    pub camera: String,
    /// Day filter, `YYYYmmdd`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Hour filter, 0-23.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<u8>,
    /// 1-based page number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Items per page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
}

impl ListVideosQuery {
    /// Lists every recording of a camera.
    pub fn new(camera: impl Into<String>) -> Self {
        Self {
            camera: camera.into(),
            date: None,
            hour: None,
            page: None,
            page_size: None,
        }
    }

    /// Builder: restrict to one day.
    pub fn date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    /// Builder: restrict to one hour of the day.
    pub fn hour(mut self, hour: u8) -> Self {
        self.hour = Some(hour);
        self
    }

    /// Builder: select a page.
    pub fn page(mut self, page: u32, page_size: u32) -> Self {
        self.page = Some(page);
        self.page_size = Some(page_size);
        self
    }

    /// The date/hour part of the query.
    pub fn filter(&self) -> VideoFilter {
        VideoFilter {
            date: self.date.clone(),
            hour: self.hour,
        }
    }
}

/// `READ_FILE` payload. Offsets are inclusive; `None` means "to the edge of
/// the file".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadFileRequest {
    /// Camera the recording belongs to.
    pub camera: String,
    /// Recording file name.
    pub filename: String,
    /// First byte, default 0.
    #[serde(default)]
    pub start: Option<u64>,
    /// Last byte, default `size - 1`.
    #[serde(default)]
    pub end: Option<u64>,
}

impl ReadFileRequest {
    /// Reads a whole recording.
    pub fn whole(camera: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            camera: camera.into(),
            filename: filename.into(),
            start: None,
            end: None,
        }
    }

    /// Builder: set the byte bounds.
    pub fn range(mut self, start: Option<u64>, end: Option<u64>) -> Self {
        self.start = start;
        self.end = end;
        self
    }
}

/// Responses a device sends back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `LIST_VIDEOS_RES`.
    Videos(VideoPage),
    /// `READ_FILE_RES`; `length` bytes follow as binary frames.
    File(FileRange),
    /// `ERROR`.
    Error(ErrorBody),
}

impl Response {
    /// Creates an error response.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error(ErrorBody::new(code, message))
    }

    /// Returns true unless this is an error response.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Error(_))
    }

    /// Returns the error if this is an error response.
    pub fn as_error(&self) -> Option<&ErrorBody> {
        match self {
            Self::Error(error) => Some(error),
            _ => None,
        }
    }

    /// Number of binary bytes the device announced after this response.
    pub fn expected_length(&self) -> u64 {
        match self {
            Self::File(range) => range.length,
            _ => 0,
        }
    }
}

impl Body for Response {
    fn message_type(&self) -> MessageType {
        match self {
            Self::Videos(_) => MessageType::ListVideosRes,
            Self::File(_) => MessageType::ReadFileRes,
            Self::Error(_) => MessageType::Error,
        }
    }

    fn to_payload(&self) -> ProtocolResult<Value> {
        let value = match self {
            Self::Videos(page) => serde_json::to_value(page)?,
            Self::File(range) => serde_json::to_value(range)?,
            Self::Error(error) => serde_json::to_value(error)?,
        };
        Ok(value)
    }

    fn from_wire(wire: &WireEnvelope) -> ProtocolResult<Self> {
        match wire.message_type() {
            Some(MessageType::ListVideosRes) => Ok(Self::Videos(wire.payload_as()?)),
            Some(MessageType::ReadFileRes) => Ok(Self::File(wire.payload_as()?)),
            Some(MessageType::Error) => Ok(Self::Error(wire.payload_as()?)),
            _ => Err(ProtocolError::unknown_type(&wire.kind)),
        }
    }
}

/// `LIST_VIDEOS_RES` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoPage {
    /// Recordings on this page, newest first.
    pub videos: Vec<VideoInfo>,
    /// Matching recordings across all pages.
    pub total: usize,
    /// Page number served.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Page size applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    /// Number of pages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
}

impl From<Page<VideoInfo>> for VideoPage {
    fn from(page: Page<VideoInfo>) -> Self {
        Self {
            videos: page.items,
            total: page.total,
            page: Some(page.page),
            page_size: Some(page.page_size),
            total_pages: Some(page.total_pages),
        }
    }
}

/// `READ_FILE_RES` payload: the resolved range and how many bytes follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRange {
    /// Total file size.
    pub size: u64,
    /// First byte served (inclusive).
    pub start: u64,
    /// Last byte served (inclusive).
    pub end: u64,
    /// Bytes that follow as binary frames.
    pub length: u64,
}

impl FileRange {
    /// Resolves optional inclusive bounds against a file size.
    ///
    /// Returns `None` when `end >= size` or `start > end`; an empty file has
    /// no valid range at all.
    pub fn resolve(size: u64, start: Option<u64>, end: Option<u64>) -> Option<Self> {
        let start = start.unwrap_or(0);
        let end = match end {
            Some(end) => end,
            None => size.checked_sub(1)?,
        };
        if end >= size || start > end {
            return None;
        }
        Some(Self {
            size,
            start,
            end,
            length: end - start + 1,
        })
    }
}

/// Error codes a device reports in `ERROR` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Recording does not exist.
    FileNotFound,
    /// Requested bounds do not fit the file.
    InvalidRange,
    /// Payload failed validation.
    InvalidRequest,
    /// The request `type` is not handled by the device.
    UnknownRequest,
    /// Listing failed for another reason.
    ListVideosFailed,
    /// Reading failed for another reason.
    ReadFileFailed,
    /// A code this build does not know.
    #[serde(other)]
    Other,
}

impl ErrorCode {
    /// Returns a human-readable description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::FileNotFound => "Recording not found",
            Self::InvalidRange => "Requested range is not satisfiable",
            Self::InvalidRequest => "The request was invalid",
            Self::UnknownRequest => "The request type is not supported",
            Self::ListVideosFailed => "Listing recordings failed",
            Self::ReadFileFailed => "Reading the recording failed",
            Self::Other => "The device reported an error",
        }
    }
}

/// `ERROR` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code.
    pub error: ErrorCode,
    /// Human-readable message, surfaced to HTTP callers.
    pub message: String,
}

impl ErrorBody {
    /// Creates a new error body.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error.description(), self.message)
    }
}

impl std::error::Error for ErrorBody {}

/// Uncorrelated messages a device sends on its own initiative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// Replace the device's camera list wholesale.
    RegisterCameras(CameraList),
}

impl Control {
    /// Creates a `REGISTER_CAMERAS` message.
    pub fn register_cameras<I, S>(cameras: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::RegisterCameras(CameraList {
            cameras: cameras.into_iter().map(Into::into).collect(),
        })
    }

    /// Serializes to a text frame (no `id`).
    pub fn to_json(&self) -> ProtocolResult<String> {
        let (kind, payload) = match self {
            Self::RegisterCameras(list) => {
                (MessageType::RegisterCameras, serde_json::to_value(list)?)
            }
        };
        WireEnvelope {
            id: None,
            kind: kind.as_str().to_string(),
            payload,
        }
        .to_json()
    }

    /// Lifts a parsed wire envelope.
    pub fn from_wire(wire: &WireEnvelope) -> ProtocolResult<Self> {
        match wire.message_type() {
            Some(MessageType::RegisterCameras) => Ok(Self::RegisterCameras(wire.payload_as()?)),
            _ => Err(ProtocolError::unknown_type(&wire.kind)),
        }
    }
}

/// `REGISTER_CAMERAS` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraList {
    /// Camera identifiers served by the device.
    pub cameras: Vec<String>,
}

/// A text frame received by the relay from a device, classified once.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceMessage {
    /// Control traffic for the registry.
    Control(Control),
    /// A correlated response for a pending request.
    Response(Envelope<Response>),
}

impl DeviceMessage {
    /// Parses and classifies a text frame from a device.
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        let wire = WireEnvelope::parse(text)?;
        if wire.message_type() == Some(MessageType::RegisterCameras) {
            return Ok(Self::Control(Control::from_wire(&wire)?));
        }
        Ok(Self::Response(Envelope::from_wire(&wire)?))
    }
}

/// The first message a device sends after the transport opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthMessage {
    /// Shared secret configured on both sides.
    pub token: String,
}

impl AuthMessage {
    /// Creates an auth message.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Serializes to a text frame.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a text frame.
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
