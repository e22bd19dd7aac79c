//! Transport-neutral tunnel frames and the binary chunk layout.
//!
//! File bytes travel as binary frames prefixed with the request id they
//! belong to:
//!
//! ```text
//! +---------------------------+------------------+
//! | request id (36 bytes, hex |  chunk payload   |
//! | UUID text, no terminator) |  (0..N bytes)    |
//! +---------------------------+------------------+
//! ```
//!
//! Chunks carry no sequence number; the tunnel is an ordered stream, so
//! appending in arrival order reconstructs the range.

use bytes::{BufMut, Bytes, BytesMut};

use crate::REQUEST_ID_LEN;
use crate::error::{ProtocolError, ProtocolResult};

/// One message on the tunnel, independent of the WebSocket library in use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// JSON envelope or auth message.
    Text(String),
    /// Request-id-prefixed file chunk.
    Binary(Bytes),
}

impl Frame {
    /// Creates a text frame.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Creates a binary chunk frame for `request_id`.
    pub fn chunk(request_id: &str, payload: &[u8]) -> ProtocolResult<Self> {
        Ok(Self::Binary(encode_chunk(request_id, payload)?))
    }
}

/// Prefixes `payload` with its 36-byte request id.
///
/// # Example
///
/// ```rust
/// use camrelay_protocol::{decode_chunk, encode_chunk, new_request_id};
///
/// let id = new_request_id();
/// let frame = encode_chunk(&id, b"abc").unwrap();
/// let (decoded_id, payload) = decode_chunk(frame).unwrap();
/// assert_eq!(decoded_id, id);
/// assert_eq!(&payload[..], b"abc");
/// ```
pub fn encode_chunk(request_id: &str, payload: &[u8]) -> ProtocolResult<Bytes> {
    if request_id.len() != REQUEST_ID_LEN {
        return Err(ProtocolError::InvalidRequestId);
    }

    let mut buffer = BytesMut::with_capacity(REQUEST_ID_LEN + payload.len());
    buffer.put_slice(request_id.as_bytes());
    buffer.put_slice(payload);
    Ok(buffer.freeze())
}

/// Splits a binary frame into its request id and payload.
///
/// The payload shares the frame's buffer; nothing is copied.
pub fn decode_chunk(frame: Bytes) -> ProtocolResult<(String, Bytes)> {
    if frame.len() < REQUEST_ID_LEN {
        return Err(ProtocolError::FrameTooShort {
            len: frame.len(),
            min: REQUEST_ID_LEN,
        });
    }

    let id = std::str::from_utf8(&frame[..REQUEST_ID_LEN])
        .map_err(|_| ProtocolError::InvalidRequestId)?
        .to_string();
    Ok((id, frame.slice(REQUEST_ID_LEN..)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::new_request_id;

    #[test]
    fn chunk_layout() {
        let id = "0b6f1c2e-6f0a-4c52-9a57-3f1f3c2f9d11";
        let frame = encode_chunk(id, b"\x00\x01\x02").unwrap();

        assert_eq!(frame.len(), REQUEST_ID_LEN + 3);
        assert_eq!(&frame[..REQUEST_ID_LEN], id.as_bytes());
        assert_eq!(&frame[REQUEST_ID_LEN..], b"\x00\x01\x02");
    }

    #[test]
    fn empty_payload_is_allowed() {
        let id = new_request_id();
        let (decoded, payload) = decode_chunk(encode_chunk(&id, &[]).unwrap()).unwrap();
        assert_eq!(decoded, id);
        assert!(payload.is_empty());
    }

    #[test]
    fn short_frame_is_rejected() {
        let result = decode_chunk(Bytes::from_static(b"too short"));
        assert!(matches!(
            result,
            Err(ProtocolError::FrameTooShort { len: 9, min: 36 })
        ));
    }

    #[test]
    fn non_utf8_prefix_is_rejected() {
        let mut raw = vec![0xff; REQUEST_ID_LEN];
        raw.extend_from_slice(b"data");
        assert!(matches!(
            decode_chunk(Bytes::from(raw)),
            Err(ProtocolError::InvalidRequestId)
        ));
    }

    #[test]
    fn encode_rejects_wrong_id_length() {
        assert!(matches!(
            encode_chunk("req-1", b"x"),
            Err(ProtocolError::InvalidRequestId)
        ));
    }

    #[test]
    fn chunk_frame_helper() {
        let id = new_request_id();
        match Frame::chunk(&id, b"payload").unwrap() {
            Frame::Binary(bytes) => assert_eq!(&bytes[REQUEST_ID_LEN..], b"payload"),
            other => panic!("expected binary frame, got {other:?}"),
        }
        assert_eq!(Frame::text("hi"), Frame::Text("hi".to_string()));
    }
}
