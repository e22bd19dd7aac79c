//! Tunnel connection loop.
//!
//! ```text
//! Disconnected -> Connecting -> Authenticating -> Connected
//!       ^______________|______________|______________|
//!                 (failure or relay close, then back-off)
//! ```
//!
//! A session connects, sends the auth token and the camera list, then serves
//! requests one at a time until the relay goes away. A relay that sends
//! nothing, not even a pong, for a ping interval plus the ping timeout is
//! treated as gone. The back-off wait and every session phase end as soon as
//! shutdown is requested.

use std::time::Duration;

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};
use url::Url;

use camrelay_core::ShutdownHandle;
use camrelay_protocol::{AuthMessage, CLOSE_AUTH_FAILED, CLOSE_AUTH_MALFORMED, Control, Frame};

use crate::config::{AgentConfig, MIN_PING_INTERVAL};
use crate::error::{AgentError, AgentResult};
use crate::handler::RequestHandler;
use crate::store::RecordingStore;

/// Replies queued ahead of the socket writer.
const OUTBOUND_BUFFER: usize = 16;

/// How long the writer gets to send the close frame once a session ends.
const WRITER_GRACE: Duration = Duration::from_secs(5);

/// Where the agent is in its connection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Not connected; waiting out the back-off delay.
    Disconnected,
    /// Opening the WebSocket.
    Connecting,
    /// Sending the token and camera list.
    Authenticating,
    /// Serving requests.
    Connected,
    /// Stopped for good.
    Stopped,
}

/// How a session ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// The relay closed the tunnel or the stream ended.
    Closed,
    /// Shutdown was requested.
    Stopped,
}

/// The edge agent.
pub struct Agent {
    config: AgentConfig,
    handler: RequestHandler,
    state: watch::Sender<AgentState>,
}

impl Agent {
    /// Creates an agent from its configuration.
    pub fn new(config: AgentConfig) -> Self {
        let store = RecordingStore::new(&config.recordings_dir);
        let handler = RequestHandler::new(store, config.chunk_size);
        let (state, _) = watch::channel(AgentState::Disconnected);
        Self {
            config,
            handler,
            state,
        }
    }

    /// Current state.
    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    /// Watches state changes.
    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }

    /// Runs sessions until shutdown, reconnecting after each failure.
    ///
    /// Only an invalid configuration ends this with an error.
    pub async fn run(&self, shutdown: ShutdownHandle) -> AgentResult<()> {
        let url = self.config.tunnel_url()?;

        while !shutdown.is_shutdown() {
            match self.session(&url, &shutdown).await {
                Ok(SessionEnd::Stopped) => break,
                Ok(SessionEnd::Closed) => info!("Relay closed the tunnel"),
                Err(e @ AgentError::AuthRejected { .. }) => {
                    warn!(error = %e, "Authentication failed")
                }
                Err(e) => warn!(error = %e, "Tunnel session failed"),
            }

            self.set_state(AgentState::Disconnected);
            let delay = self.config.reconnect_delay;
            info!(
                delay_secs = delay.as_secs_f64(),
                "Reconnecting after back-off"
            );
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(AgentState::Stopped);
        info!("Agent stopped");
        Ok(())
    }

    async fn session(&self, url: &Url, shutdown: &ShutdownHandle) -> AgentResult<SessionEnd> {
        self.set_state(AgentState::Connecting);
        info!(url = %url, "Connecting to relay");

        let (socket, _) = tokio::select! {
            _ = shutdown.wait() => return Ok(SessionEnd::Stopped),
            connected = connect_async(url.as_str()) => connected?,
        };
        let (mut sink, mut stream) = socket.split();

        self.set_state(AgentState::Authenticating);
        let auth = AuthMessage::new(&self.config.device_token).to_json()?;
        sink.send(Message::Text(auth.into())).await?;

        let cameras = self.cameras().await;
        let register = Control::register_cameras(&cameras).to_json()?;
        sink.send(Message::Text(register.into())).await?;

        self.set_state(AgentState::Connected);
        info!(device_id = %self.config.device_id, cameras = ?cameras, "Connected to relay");

        let (out, queue) = mpsc::channel(OUTBOUND_BUFFER);
        let mut writer = tokio::spawn(write_frames(sink, queue, self.config.ping_interval));
        let end = self.serve(&mut stream, &out, shutdown).await;

        drop(out);
        // A dead peer can leave the writer stuck on the socket.
        let finished = tokio::time::timeout(WRITER_GRACE, &mut writer).await;
        if finished.is_err() {
            debug!("Tunnel writer did not finish, aborting it");
            writer.abort();
        }
        end
    }

    /// Receive loop: one request at a time, in arrival order.
    ///
    /// Ends with [`AgentError::RelaySilent`] once the relay has been quiet for
    /// [`AgentConfig::idle_limit`]. The clock restarts after every inbound
    /// frame, including pongs, and after each request is handled.
    async fn serve<S>(
        &self,
        stream: &mut S,
        out: &mpsc::Sender<Frame>,
        shutdown: &ShutdownHandle,
    ) -> AgentResult<SessionEnd>
    where
        S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        let idle_limit = self.config.idle_limit();
        let idle = tokio::time::sleep(idle_limit);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                _ = shutdown.wait() => return Ok(SessionEnd::Stopped),
                _ = &mut idle => {
                    warn!(
                        silent_secs = idle_limit.as_secs(),
                        "Relay stopped answering pings"
                    );
                    return Err(AgentError::RelaySilent {
                        silent_for: idle_limit,
                    });
                }
                message = stream.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            self.handler.handle_text(text.as_str(), out).await?
                        }
                        Some(Ok(Message::Binary(_))) => warn!("Ignoring binary frame from relay"),
                        Some(Ok(Message::Close(frame))) => return closed(frame),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(SessionEnd::Closed),
                    }
                    idle.as_mut().reset(Instant::now() + idle_limit);
                }
            }
        }
    }

    /// Configured cameras, or the directories found under the recordings root.
    async fn cameras(&self) -> Vec<String> {
        if !self.config.cameras.is_empty() {
            return self.config.cameras.clone();
        }
        match self.handler.store().discover_cameras().await {
            Ok(cameras) => cameras,
            Err(e) => {
                warn!(error = %e, "Camera discovery failed; registering none");
                Vec::new()
            }
        }
    }

    fn set_state(&self, state: AgentState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Agent state changed");
        }
    }
}

/// Maps the relay's close frame to a session outcome.
fn closed(frame: Option<CloseFrame>) -> AgentResult<SessionEnd> {
    match frame {
        Some(frame) => {
            let code = u16::from(frame.code);
            if code == CLOSE_AUTH_FAILED || code == CLOSE_AUTH_MALFORMED {
                return Err(AgentError::AuthRejected {
                    code,
                    reason: frame.reason.as_str().to_string(),
                });
            }
            let reason = frame.reason.as_str();
            debug!(code, reason, "Relay sent close frame");
            Ok(SessionEnd::Closed)
        }
        None => Ok(SessionEnd::Closed),
    }
}

/// Sends queued frames and keep-alive pings until the queue closes, then
/// closes the socket normally.
async fn write_frames<S>(
    mut sink: S,
    mut queue: mpsc::Receiver<Frame>,
    ping_every: Duration,
) where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let ping_every = ping_every.max(MIN_PING_INTERVAL);
    let mut ping = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let message = tokio::select! {
            frame = queue.recv() => match frame {
                Some(Frame::Text(text)) => Message::Text(text.into()),
                Some(Frame::Binary(bytes)) => Message::Binary(bytes),
                None => break,
            },
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };
        if let Err(e) = sink.send(message).await {
            warn!(error = %e, "Tunnel send error");
            return;
        }
    }

    let close = CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    };
    let _ = sink.send(Message::Close(Some(close))).await;
    debug!("Tunnel writer stopped");
}
