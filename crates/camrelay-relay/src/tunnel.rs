//! Device tunnel endpoint.
//!
//! The first text frame must be the auth message. After that the socket is
//! split: a writer task drains the connection's outbound queue (so sends are
//! serialized), and this task runs the receive loop, routing every frame
//! through the demultiplexer until the device goes away or the connection is
//! closed from the relay side.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use camrelay_protocol::{AuthMessage, CLOSE_AUTH_FAILED, CLOSE_AUTH_MALFORMED, Frame};

use crate::api::AppState;
use crate::demux;
use crate::registry::DeviceConnection;

/// Result of the auth handshake.
#[derive(Debug, PartialEq, Eq)]
enum AuthOutcome {
    Accepted,
    Rejected { code: u16, reason: &'static str },
    /// The device closed or errored before sending anything.
    Gone,
}

/// `GET /api/ws/device/{device_id}` upgrade handler.
pub(crate) async fn device_socket(
    ws: WebSocketUpgrade,
    Path(device_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_tunnel(socket, device_id, state))
}

async fn run_tunnel(mut socket: WebSocket, device_id: String, state: AppState) {
    let outcome = authenticate(
        &mut socket,
        &state.config.device_token,
        state.config.request_timeout,
    )
    .await;

    match outcome {
        AuthOutcome::Accepted => info!(device_id = %device_id, "Device authenticated"),
        AuthOutcome::Rejected { code, reason } => {
            warn!(device_id = %device_id, code, reason, "Device failed authentication");
            let close = CloseFrame {
                code,
                reason: reason.into(),
            };
            let _ = socket.send(Message::Close(Some(close))).await;
            return;
        }
        AuthOutcome::Gone => {
            debug!(device_id = %device_id, "Device left before authenticating");
            return;
        }
    }

    let (outbound, queue) = mpsc::channel(state.config.outbound_buffer.max(1));
    let conn = state.registry.connect(&device_id, outbound).await;
    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_frames(sink, queue, conn.clone()));

    loop {
        tokio::select! {
            _ = conn.closed() => break,
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    demux::route(&state.registry, &conn, Frame::Text(text.to_string()));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    demux::route(&state.registry, &conn, Frame::Binary(bytes));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!(device_id = %device_id, frame = ?frame, "Device closed tunnel");
                    break;
                }
                Some(Err(e)) => {
                    warn!(device_id = %device_id, error = %e, "Tunnel receive error");
                    break;
                }
                None => break,
            }
        }
    }

    let conn_id = conn.conn_id();
    state.registry.disconnect_if(&device_id, conn_id).await;
    let _ = writer.await;
}

/// Waits for the auth frame and checks its token.
async fn authenticate(socket: &mut WebSocket, expected: &str, wait: Duration) -> AuthOutcome {
    let first = match tokio::time::timeout(wait, socket.recv()).await {
        Err(_) => {
            return AuthOutcome::Rejected {
                code: CLOSE_AUTH_MALFORMED,
                reason: "Auth timeout",
            };
        }
        Ok(None) | Ok(Some(Err(_))) => return AuthOutcome::Gone,
        Ok(Some(Ok(message))) => message,
    };

    let text = match first {
        Message::Text(text) => text,
        Message::Close(_) => return AuthOutcome::Gone,
        _ => {
            return AuthOutcome::Rejected {
                code: CLOSE_AUTH_MALFORMED,
                reason: "Auth failed",
            };
        }
    };

    check_auth(text.as_str(), expected)
}

fn check_auth(text: &str, expected: &str) -> AuthOutcome {
    match AuthMessage::decode(text) {
        Ok(auth) if tokens_match(&auth.token, expected) => AuthOutcome::Accepted,
        Ok(_) => AuthOutcome::Rejected {
            code: CLOSE_AUTH_FAILED,
            reason: "Invalid token",
        },
        Err(_) => AuthOutcome::Rejected {
            code: CLOSE_AUTH_MALFORMED,
            reason: "Auth failed",
        },
    }
}

/// Compares SHA-256 digests of both tokens.
fn tokens_match(presented: &str, expected: &str) -> bool {
    Sha256::digest(presented.as_bytes()) == Sha256::digest(expected.as_bytes())
}

/// Sends queued frames until the queue ends or the connection closes.
async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<Frame>,
    conn: Arc<DeviceConnection>,
) {
    loop {
        tokio::select! {
            biased;
            _ = conn.closed() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            frame = queue.recv() => {
                let Some(frame) = frame else { break };
                let message = match frame {
                    Frame::Text(text) => Message::Text(text.into()),
                    Frame::Binary(bytes) => Message::Binary(bytes),
                };
                if let Err(e) = sink.send(message).await {
                    warn!(device_id = %conn.device_id(), error = %e, "Tunnel send error");
                    break;
                }
            }
        }
    }
    debug!(device_id = %conn.device_id(), "Tunnel writer stopped");
}
