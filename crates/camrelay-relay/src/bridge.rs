//! Maps HTTP byte-range requests onto `READ_FILE` and reassembles replies.

use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response as HttpResponse};
use bytes::{Bytes, BytesMut};

use camrelay_protocol::{FileRange, ReadFileRequest, Response};

use crate::error::{RelayError, RelayResult};

/// Content type of every served recording.
pub const VIDEO_CONTENT_TYPE: &str = "video/mp4";

/// Bounds from a `Range: bytes=<start>-<end>` header. Either side may be
/// absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte; absent means 0.
    pub start: Option<u64>,
    /// Last byte (inclusive); absent means end of file.
    pub end: Option<u64>,
}

/// Parses a `Range` header value.
///
/// Only a single `bytes=` span is understood. Anything else yields `None`
/// and the request is served as if no range had been asked for. A leading
/// `-N` is read as an end offset, not a suffix length.
pub fn parse_range(value: &str) -> Option<ByteRange> {
    let spec = value.trim().strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    Some(ByteRange {
        start: parse_bound(start)?,
        end: parse_bound(end)?,
    })
}

/// `Some(None)` for an empty bound, `None` for an unparsable one.
fn parse_bound(bound: &str) -> Option<Option<u64>> {
    let bound = bound.trim();
    if bound.is_empty() {
        Some(None)
    } else {
        bound.parse().ok().map(Some)
    }
}

/// An HTTP file request, reduced to what the device needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRequest {
    /// Camera (or device) id from the URL.
    pub camera: String,
    /// Recording file name from the URL.
    pub filename: String,
    /// Parsed `Range` header, if one was present and understood.
    pub range: Option<ByteRange>,
    /// HEAD requests only need the file size.
    pub head: bool,
}

impl FileRequest {
    /// The `READ_FILE` payload for this request.
    ///
    /// HEAD asks for the first byte only, which is enough for the device to
    /// report the file size.
    pub fn to_read_request(&self) -> ReadFileRequest {
        let read = ReadFileRequest::whole(&self.camera, &self.filename);
        if self.head {
            return read.range(Some(0), Some(0));
        }
        match self.range {
            Some(range) => read.range(range.start, range.end),
            None => read,
        }
    }

    /// Turns the device's reply into an HTTP reply.
    pub fn assemble(&self, response: Response, chunks: Vec<Bytes>) -> RelayResult<FileReply> {
        let range = match response {
            Response::File(range) => range,
            Response::Error(error) => return Err(RelayError::Device(error)),
            Response::Videos(_) => return Err(RelayError::unexpected("LIST_VIDEOS_RES")),
        };

        if self.head {
            return Ok(FileReply::Head { size: range.size });
        }

        let body = concat(chunks);
        let received = body.len() as u64;
        if received < range.length {
            return Err(RelayError::IncompleteTransfer {
                expected: range.length,
                received,
            });
        }
        if received > range.length {
            return Err(RelayError::TransferOverrun {
                expected: range.length,
                received,
            });
        }

        Ok(if self.range.is_some() {
            FileReply::Partial { range, body }
        } else {
            FileReply::Full { body }
        })
    }
}

fn concat(mut chunks: Vec<Bytes>) -> Bytes {
    if chunks.len() == 1 {
        return chunks.pop().unwrap_or_default();
    }
    let total = chunks.iter().map(Bytes::len).sum();
    let mut body = BytesMut::with_capacity(total);
    for chunk in chunks {
        body.extend_from_slice(&chunk);
    }
    body.freeze()
}

/// `Content-Range` value for a served span.
fn content_range(range: &FileRange) -> String {
    format!("bytes {}-{}/{}", range.start, range.end, range.size)
}

/// A reassembled file reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileReply {
    /// 200 with the whole file.
    Full { body: Bytes },
    /// 206 with the requested span.
    Partial { range: FileRange, body: Bytes },
    /// 200 headers only, `Content-Length` is the file size.
    Head { size: u64 },
}

impl IntoResponse for FileReply {
    fn into_response(self) -> HttpResponse {
        let (status, content_length, content_range, body) = match self {
            Self::Full { body } => (StatusCode::OK, body.len() as u64, None, Body::from(body)),
            Self::Partial { range, body } => (
                StatusCode::PARTIAL_CONTENT,
                body.len() as u64,
                Some(content_range(&range)),
                Body::from(body),
            ),
            Self::Head { size } => (StatusCode::OK, size, None, Body::empty()),
        };

        let mut response = HttpResponse::new(body);
        *response.status_mut() = status;

        let headers = response.headers_mut();
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(VIDEO_CONTENT_TYPE),
        );
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(content_length));
        if let Some(content_range) = content_range
            && let Ok(value) = HeaderValue::from_str(&content_range)
        {
            headers.insert(header::CONTENT_RANGE, value);
        }
        response
    }
}
