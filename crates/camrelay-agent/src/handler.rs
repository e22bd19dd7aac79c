//! Dispatches relay requests and queues the replies.
//!
//! Every request gets exactly one JSON reply. A successful `READ_FILE` reply
//! is followed by the file bytes as request-id-prefixed binary frames. Local
//! failures become `ERROR` replies; nothing here ends the tunnel except the
//! outbound queue going away.

use camrelay_protocol::{
    Envelope, ErrorCode, Frame, ListVideosQuery, ProtocolError, REQUEST_ID_LEN, ReadFileRequest,
    Request, Response, WireEnvelope,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{AgentError, AgentResult};
use crate::store::RecordingStore;

/// Handles requests against a [`RecordingStore`].
#[derive(Debug, Clone)]
pub struct RequestHandler {
    store: RecordingStore,
    chunk_size: usize,
}

impl RequestHandler {
    /// Creates a handler sending file data in `chunk_size` pieces.
    pub fn new(store: RecordingStore, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &RecordingStore {
        &self.store
    }

    /// Handles one text frame from the relay.
    ///
    /// Fails only when `out` is closed.
    pub async fn handle_text(&self, text: &str, out: &mpsc::Sender<Frame>) -> AgentResult<()> {
        let wire = match WireEnvelope::parse(text) {
            Ok(wire) => wire,
            Err(e) => {
                warn!(error = %e, "Dropping unparsable frame from relay");
                return Ok(());
            }
        };
        let Some(id) = wire.id.clone() else {
            warn!(kind = %wire.kind, "Dropping request without id");
            return Ok(());
        };

        match Envelope::<Request>::from_wire(&wire) {
            Ok(envelope) => self.dispatch(envelope, out).await,
            Err(ProtocolError::UnknownType { kind }) => {
                warn!(request_id = %id, kind = %kind, "Unknown request type");
                let message = format!("Unknown request type: {kind}");
                let response = Response::error(ErrorCode::UnknownRequest, message);
                reply(out, &id, response).await
            }
            Err(e) => {
                warn!(request_id = %id, error = %e, "Invalid request payload");
                let response = Response::error(ErrorCode::InvalidRequest, e.to_string());
                reply(out, &id, response).await
            }
        }
    }

    async fn dispatch(
        &self,
        envelope: Envelope<Request>,
        out: &mpsc::Sender<Frame>,
    ) -> AgentResult<()> {
        let Envelope { id, body } = envelope;
        match body {
            Request::ListVideos(query) => self.list_videos(&id, &query, out).await,
            Request::ReadFile(read) => self.read_file(&id, &read, out).await,
        }
    }

    async fn list_videos(
        &self,
        id: &str,
        query: &ListVideosQuery,
        out: &mpsc::Sender<Frame>,
    ) -> AgentResult<()> {
        let response = match self.store.list(query).await {
            Ok(page) => {
                debug!(
                    request_id = %id,
                    camera = %query.camera,
                    total = page.total,
                    returned = page.items.len(),
                    "Listed recordings"
                );
                Response::Videos(page.into())
            }
            Err(e) => {
                warn!(request_id = %id, camera = %query.camera, error = %e, "Listing failed");
                Response::error(e.list_code(), e.to_string())
            }
        };
        reply(out, id, response).await
    }

    async fn read_file(
        &self,
        id: &str,
        read: &ReadFileRequest,
        out: &mpsc::Sender<Frame>,
    ) -> AgentResult<()> {
        if id.len() != REQUEST_ID_LEN {
            let message = format!("Request id must be {REQUEST_ID_LEN} bytes");
            return reply(out, id, Response::error(ErrorCode::InvalidRequest, message)).await;
        }

        let mut reader = match self.store.open(read).await {
            Ok(reader) => reader,
            Err(e) => {
                warn!(
                    request_id = %id,
                    camera = %read.camera,
                    filename = %read.filename,
                    error = %e,
                    "Read rejected"
                );
                return reply(out, id, Response::error(e.read_code(), e.to_string())).await;
            }
        };

        let range = reader.range();
        reply(out, id, Response::File(range)).await?;

        let mut sent = 0u64;
        loop {
            match reader.next_chunk(self.chunk_size).await {
                Ok(Some(chunk)) => {
                    sent += chunk.len() as u64;
                    queue(out, Frame::chunk(id, &chunk)?).await?;
                }
                Ok(None) => break,
                Err(e) => {
                    // The header is already out; the relay sees a short transfer.
                    warn!(
                        request_id = %id,
                        filename = %read.filename,
                        sent,
                        expected = range.length,
                        error = %e,
                        "Read failed mid-transfer"
                    );
                    return Ok(());
                }
            }
        }

        info!(
            request_id = %id,
            camera = %read.camera,
            filename = %read.filename,
            start = range.start,
            end = range.end,
            bytes = sent,
            "Served file range"
        );
        Ok(())
    }
}

async fn reply(out: &mpsc::Sender<Frame>, id: &str, response: Response) -> AgentResult<()> {
    let text = Envelope::new(id, response).to_json()?;
    queue(out, Frame::Text(text)).await
}

async fn queue(out: &mpsc::Sender<Frame>, frame: Frame) -> AgentResult<()> {
    out.send(frame).await.map_err(|_| AgentError::TunnelClosed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camrelay_protocol::{FileRange, decode_chunk, new_request_id};

    fn handler_with(
        files: &[(&str, usize)],
        chunk_size: usize,
    ) -> (tempfile::TempDir, RequestHandler) {
        let dir = tempfile::tempdir().unwrap();
        let merged = dir.path().join("front").join("merged");
        std::fs::create_dir_all(&merged).unwrap();
        for (name, len) in files {
            let content: Vec<u8> = (0..*len).map(|i| (i % 256) as u8).collect();
            std::fs::write(merged.join(name), content).unwrap();
        }
        let handler = RequestHandler::new(RecordingStore::new(dir.path()), chunk_size);
        (dir, handler)
    }

    async fn run(handler: &RequestHandler, text: &str) -> Vec<Frame> {
        let (tx, mut rx) = mpsc::channel(64);
        handler.handle_text(text, &tx).await.unwrap();
        drop(tx);
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        frames
    }

    fn response(frame: &Frame) -> Envelope<Response> {
        match frame {
            Frame::Text(text) => Envelope::decode(text).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    fn request_json(request: Request) -> (String, String) {
        let envelope = Envelope::request(request);
        (envelope.id.clone(), envelope.to_json().unwrap())
    }

    #[tokio::test]
    async fn read_file_streams_header_then_chunks() {
        let (_dir, handler) = handler_with(&[("a.mp4", 1000)], 64);
        let (id, text) = request_json(Request::ReadFile(
            ReadFileRequest::whole("front", "a.mp4").range(Some(100), Some(299)),
        ));

        let frames = run(&handler, &text).await;

        let header = response(&frames[0]);
        assert_eq!(header.id, id);
        assert_eq!(
            header.body,
            Response::File(FileRange {
                size: 1000,
                start: 100,
                end: 299,
                length: 200
            })
        );

        let mut body = Vec::new();
        for frame in &frames[1..] {
            let Frame::Binary(bytes) = frame else {
                panic!("expected binary frame")
            };
            let (chunk_id, chunk) = decode_chunk(bytes.clone()).unwrap();
            assert_eq!(chunk_id, id);
            assert!(chunk.len() <= 64);
            body.extend_from_slice(&chunk);
        }
        assert_eq!(frames.len(), 1 + 4);
        let expected: Vec<u8> = (100..300).map(|i| (i % 256) as u8).collect();
        assert_eq!(body, expected);
    }

    #[tokio::test]
    async fn read_errors_become_error_replies() {
        let (_dir, handler) = handler_with(&[("a.mp4", 10)], 64);

        let cases = [
            (
                ReadFileRequest::whole("front", "nope.mp4"),
                ErrorCode::FileNotFound,
            ),
            (
                ReadFileRequest::whole("front", "a.mp4").range(Some(0), Some(10)),
                ErrorCode::InvalidRange,
            ),
            (
                ReadFileRequest::whole("front", "../../etc/passwd"),
                ErrorCode::InvalidRequest,
            ),
        ];

        for (read, code) in cases {
            let (id, text) = request_json(Request::ReadFile(read));
            let frames = run(&handler, &text).await;
            assert_eq!(frames.len(), 1);
            let reply = response(&frames[0]);
            assert_eq!(reply.id, id);
            assert_eq!(reply.body.as_error().map(|e| e.error), Some(code));
        }
    }

    #[tokio::test]
    async fn list_videos_replies_with_page() {
        let (_dir, handler) = handler_with(
            &[("20240115_10:30.mp4", 5), ("20240115_11:30.mp4", 6)],
            64,
        );
        let (id, text) = request_json(Request::ListVideos(
            ListVideosQuery::new("front").page(1, 1),
        ));

        let frames = run(&handler, &text).await;
        assert_eq!(frames.len(), 1);
        let reply = response(&frames[0]);
        assert_eq!(reply.id, id);
        let Response::Videos(page) = reply.body else {
            panic!("expected listing")
        };
        assert_eq!(page.total, 2);
        assert_eq!(page.total_pages, Some(2));
        assert_eq!(page.videos.len(), 1);
        assert_eq!(page.videos[0].filename, "20240115_11:30.mp4");
    }

    #[tokio::test]
    async fn unknown_type_names_the_type() {
        let (_dir, handler) = handler_with(&[], 64);
        let id = new_request_id();
        let text = format!(r#"{{"id":"{id}","type":"DELETE_FILE","payload":{{}}}}"#);

        let frames = run(&handler, &text).await;
        let reply = response(&frames[0]);
        assert_eq!(reply.id, id);
        let error = reply.body.as_error().unwrap();
        assert_eq!(error.error, ErrorCode::UnknownRequest);
        assert_eq!(error.message, "Unknown request type: DELETE_FILE");
    }

    #[tokio::test]
    async fn bad_payload_is_invalid_request() {
        let (_dir, handler) = handler_with(&[], 64);
        let id = new_request_id();
        let payload = r#"{"camera":"front"}"#;
        let text = format!(r#"{{"id":"{id}","type":"READ_FILE","payload":{payload}}}"#);

        let frames = run(&handler, &text).await;
        let reply = response(&frames[0]);
        assert_eq!(
            reply.body.as_error().map(|e| e.error),
            Some(ErrorCode::InvalidRequest)
        );
    }

    #[tokio::test]
    async fn frames_without_id_are_dropped() {
        let (_dir, handler) = handler_with(&[], 64);
        for text in ["garbage", r#"{"type":"LIST_VIDEOS","payload":{"camera":"front"}}"#] {
            assert!(run(&handler, text).await.is_empty());
        }
    }

    #[tokio::test]
    async fn closed_queue_is_an_error() {
        let (_dir, handler) = handler_with(&[], 64);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let (_, text) = request_json(Request::ListVideos(ListVideosQuery::new("front")));

        let err = handler.handle_text(&text, &tx).await.unwrap_err();
        assert!(matches!(err, AgentError::TunnelClosed));
    }
}
