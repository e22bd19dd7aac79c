//! Per-connection table of in-flight requests.
//!
//! Every request sent down a device tunnel registers a pending entry under its
//! id. The entry holds a single-assignment resolver for the JSON response and,
//! for file reads, a channel that receives binary chunks in arrival order.
//! The caller that registered an entry owns its removal: a guard drops the
//! entry on every exit path (response, timeout, disconnect, cancellation), so
//! late frames for a finished request find nothing and are dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use camrelay_protocol::{Body, Envelope, Frame, Request, Response};

use crate::error::{RelayError, RelayResult};

/// When a request gives up, kept with the timeout it came from for reporting.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    timeout: Duration,
}

impl Deadline {
    fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
            timeout,
        }
    }
}

/// One request awaiting its response.
struct PendingEntry {
    /// Distinguishes this entry from a later one reusing the same id.
    serial: u64,
    /// Taken by the first response; later responses are dropped.
    resolver: Option<oneshot::Sender<Response>>,
    /// Present only for requests that expect binary chunks.
    chunks: Option<mpsc::UnboundedSender<Bytes>>,
}

#[derive(Default)]
struct PendingTable {
    entries: HashMap<String, PendingEntry>,
    /// Set once the connection is gone; no new entries are accepted.
    closed: bool,
}

/// Matches responses and chunks from one device to the requests awaiting them.
pub struct Correlator {
    device_id: String,
    outbound: mpsc::Sender<Frame>,
    table: Mutex<PendingTable>,
    next_serial: AtomicU64,
}

impl Correlator {
    /// Creates a correlator that transmits through `outbound`.
    pub fn new(device_id: impl Into<String>, outbound: mpsc::Sender<Frame>) -> Self {
        Self {
            device_id: device_id.into(),
            outbound,
            table: Mutex::new(PendingTable::default()),
            next_serial: AtomicU64::new(1),
        }
    }

    /// Sends a request and waits for its response.
    ///
    /// `timeout` covers queueing the request as well as waiting for the
    /// reply. Fails with [`RelayError::RequestTimeout`] when it elapses and
    /// with [`RelayError::DeviceDisconnected`] when the connection goes away
    /// first.
    pub async fn send(
        &self,
        request: Envelope<Request>,
        timeout: Duration,
    ) -> RelayResult<Response> {
        let deadline = Deadline::after(timeout);
        let (resolver, response) = oneshot::channel();
        let _guard = self.register(&request.id, resolver, None)?;

        self.transmit(&request, deadline).await?;
        self.await_response(&request.id, response, deadline).await
    }

    /// Sends a request whose response announces binary chunks, and collects
    /// them.
    ///
    /// After the response arrives, chunks are gathered until the declared
    /// length is reached or `transfer_timeout` passes. On that deadline the
    /// chunks received so far are returned and the shortfall is logged;
    /// callers decide whether a short body is acceptable.
    pub async fn send_with_binary(
        &self,
        request: Envelope<Request>,
        timeout: Duration,
        transfer_timeout: Duration,
    ) -> RelayResult<(Response, Vec<Bytes>)> {
        let (resolver, response) = oneshot::channel();
        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel();
        let guard = self.register(&request.id, resolver, Some(chunk_tx))?;

        let deadline = Deadline::after(timeout);
        self.transmit(&request, deadline).await?;
        let response = self.await_response(&request.id, response, deadline).await?;

        let expected = response.expected_length();
        let mut chunks = Vec::new();
        let mut received = 0u64;
        let transfer_deadline = Instant::now() + transfer_timeout;

        while received < expected {
            match tokio::time::timeout_at(transfer_deadline, chunk_rx.recv()).await {
                Ok(Some(chunk)) => {
                    received += chunk.len() as u64;
                    chunks.push(chunk);
                }
                Ok(None) => return Err(RelayError::disconnected(&self.device_id)),
                Err(_) => {
                    warn!(
                        device_id = %self.device_id,
                        request_id = %request.id,
                        expected,
                        received,
                        "Binary transfer deadline passed, returning partial data"
                    );
                    break;
                }
            }
        }

        drop(guard);
        debug!(
            device_id = %self.device_id,
            request_id = %request.id,
            bytes = received,
            chunks = chunks.len(),
            "Binary transfer complete"
        );
        Ok((response, chunks))
    }

    /// Hands a response to the request waiting for it.
    ///
    /// Returns false when no request is waiting (unknown id, already
    /// resolved, or already timed out).
    pub fn resolve(&self, envelope: Envelope<Response>) -> bool {
        let resolver = {
            let mut table = self.table.lock();
            table
                .entries
                .get_mut(&envelope.id)
                .and_then(|entry| entry.resolver.take())
        };

        match resolver {
            // The waiter may have given up between the lookup and the send.
            Some(resolver) => resolver.send(envelope.body).is_ok(),
            None => false,
        }
    }

    /// Appends a binary chunk to the request it belongs to.
    ///
    /// Returns false when no binary-bearing request with that id is pending.
    pub fn push_chunk(&self, request_id: &str, chunk: Bytes) -> bool {
        let table = self.table.lock();
        match table
            .entries
            .get(request_id)
            .and_then(|entry| entry.chunks.as_ref())
        {
            Some(sender) => sender.send(chunk).is_ok(),
            None => false,
        }
    }

    /// Fails every pending request with `DeviceDisconnected` and refuses new
    /// ones. Returns how many requests were pending.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<PendingEntry> = {
            let mut table = self.table.lock();
            table.closed = true;
            table.entries.drain().map(|(_, entry)| entry).collect()
        };
        // Dropping the resolvers and chunk senders wakes every waiter.
        drained.len()
    }

    /// Number of requests currently pending.
    pub fn pending_count(&self) -> usize {
        self.table.lock().entries.len()
    }

    fn register(
        &self,
        request_id: &str,
        resolver: oneshot::Sender<Response>,
        chunks: Option<mpsc::UnboundedSender<Bytes>>,
    ) -> RelayResult<PendingGuard<'_>> {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let mut table = self.table.lock();

        if table.closed {
            return Err(RelayError::disconnected(&self.device_id));
        }
        if table.entries.contains_key(request_id) {
            return Err(RelayError::DuplicateRequestId {
                request_id: request_id.to_string(),
            });
        }

        table.entries.insert(
            request_id.to_string(),
            PendingEntry {
                serial,
                resolver: Some(resolver),
                chunks,
            },
        );

        Ok(PendingGuard {
            table: &self.table,
            request_id: request_id.to_string(),
            serial,
        })
    }

    /// Queues the request for the socket writer. A stalled writer leaves the
    /// queue full, so the wait for a free slot shares the request deadline.
    async fn transmit(&self, request: &Envelope<Request>, deadline: Deadline) -> RelayResult<()> {
        let text = request.to_json()?;
        debug!(
            device_id = %self.device_id,
            request_id = %request.id,
            kind = %request.body.message_type(),
            "Sending request"
        );
        let queued = self.outbound.send(Frame::Text(text));
        match tokio::time::timeout_at(deadline.at, queued).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(RelayError::disconnected(&self.device_id)),
            Err(_) => {
                warn!(
                    device_id = %self.device_id,
                    request_id = %request.id,
                    timeout_secs = deadline.timeout.as_secs_f64(),
                    "Outbound queue stayed full, request not sent"
                );
                Err(timed_out(&request.id, deadline))
            }
        }
    }

    async fn await_response(
        &self,
        request_id: &str,
        response: oneshot::Receiver<Response>,
        deadline: Deadline,
    ) -> RelayResult<Response> {
        match tokio::time::timeout_at(deadline.at, response).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(RelayError::disconnected(&self.device_id)),
            Err(_) => {
                warn!(
                    device_id = %self.device_id,
                    request_id = %request_id,
                    timeout_secs = deadline.timeout.as_secs_f64(),
                    "Request timed out"
                );
                Err(timed_out(request_id, deadline))
            }
        }
    }
}

fn timed_out(request_id: &str, deadline: Deadline) -> RelayError {
    RelayError::RequestTimeout {
        request_id: request_id.to_string(),
        timeout: deadline.timeout,
    }
}

/// Removes its pending entry when dropped, unless the entry was already
/// replaced or drained.
struct PendingGuard<'a> {
    table: &'a Mutex<PendingTable>,
    request_id: String,
    serial: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        if table
            .entries
            .get(&self.request_id)
            .is_some_and(|entry| entry.serial == self.serial)
        {
            table.entries.remove(&self.request_id);
        }
    }
}
