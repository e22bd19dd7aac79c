//! Classifies inbound tunnel frames and routes them.
//!
//! Text frames are either `REGISTER_CAMERAS` control messages (to the
//! registry) or correlated responses (to the connection's correlator).
//! Binary frames are request-id-prefixed chunks. Anything that cannot be
//! routed is logged and dropped; routing never ends the connection.

use bytes::Bytes;
use tracing::{debug, warn};

use camrelay_protocol::{Control, DeviceMessage, Frame, decode_chunk};

use crate::registry::{DeviceConnection, Registry};

/// Why a frame was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The frame did not decode.
    Malformed(String),
    /// A response whose id matches no waiting request.
    UnknownResponse(String),
    /// A chunk whose id matches no pending binary request.
    UnknownChunk(String),
}

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Camera list replaced; carries the new camera count.
    CamerasRegistered(usize),
    /// A pending request was resolved.
    Resolved,
    /// A chunk was appended to a pending request.
    ChunkAccepted,
    /// The frame was dropped.
    Dropped(DropReason),
}

/// Routes one frame received from `conn`.
pub fn route(registry: &Registry, conn: &DeviceConnection, frame: Frame) -> Disposition {
    let disposition = match frame {
        Frame::Text(text) => route_text(registry, conn, &text),
        Frame::Binary(bytes) => route_binary(conn, bytes),
    };

    if let Disposition::Dropped(ref reason) = disposition {
        warn!(device_id = %conn.device_id(), reason = ?reason, "Dropped inbound frame");
    }
    disposition
}

fn route_text(registry: &Registry, conn: &DeviceConnection, text: &str) -> Disposition {
    match DeviceMessage::decode(text) {
        Ok(DeviceMessage::Control(Control::RegisterCameras(list))) => {
            let count = list.cameras.len();
            registry.register_cameras(conn, list.cameras);
            Disposition::CamerasRegistered(count)
        }
        Ok(DeviceMessage::Response(envelope)) => {
            let id = envelope.id.clone();
            if conn.correlator().resolve(envelope) {
                debug!(device_id = %conn.device_id(), request_id = %id, "Response resolved");
                Disposition::Resolved
            } else {
                Disposition::Dropped(DropReason::UnknownResponse(id))
            }
        }
        Err(e) => Disposition::Dropped(DropReason::Malformed(e.to_string())),
    }
}

fn route_binary(conn: &DeviceConnection, bytes: Bytes) -> Disposition {
    match decode_chunk(bytes) {
        Ok((id, chunk)) => {
            if conn.correlator().push_chunk(&id, chunk) {
                Disposition::ChunkAccepted
            } else {
                Disposition::Dropped(DropReason::UnknownChunk(id))
            }
        }
        Err(e) => Disposition::Dropped(DropReason::Malformed(e.to_string())),
    }
}
