//! End-to-end: a live relay, a live agent over a temporary recordings tree,
//! and HTTP requests through reqwest.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use serde_json::Value;
use tokio::task::JoinHandle;

use camrelay_agent::{Agent, AgentConfig, AgentResult, AgentState};
use camrelay_core::ShutdownHandle;
use camrelay_relay::{Registry, RelayConfig, RelayServer};

const TOKEN: &str = "e2e-token";
const DEVICE: &str = "porch";
const FILE: &str = "20240115_10:30.mp4";
const FILE_SIZE: usize = 1000;

struct Stack {
    addr: SocketAddr,
    registry: Arc<Registry>,
    relay_shutdown: ShutdownHandle,
    agent: Arc<Agent>,
    agent_shutdown: ShutdownHandle,
    agent_task: JoinHandle<AgentResult<()>>,
    http: reqwest::Client,
    _recordings: tempfile::TempDir,
}

fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

fn write_recording(root: &Path, camera: &str, name: &str, data: &[u8]) {
    let merged = root.join(camera).join("merged");
    std::fs::create_dir_all(&merged).unwrap();
    std::fs::write(merged.join(name), data).unwrap();
}

impl Stack {
    async fn start(token: &str) -> Self {
        let recordings = tempfile::tempdir().unwrap();
        write_recording(recordings.path(), "front", FILE, &content(FILE_SIZE));
        write_recording(recordings.path(), "front", "20240115_11:00.mp4", b"");
        for i in 0..130 {
            let name = format!("20240201_{:02}:{:02}.mp4", i / 60, i % 60);
            write_recording(recordings.path(), "yard", &name, b"x");
        }

        let relay_config = RelayConfig::default()
            .with_bind("127.0.0.1:0".parse().unwrap())
            .with_device_token(TOKEN)
            .with_request_timeout(Duration::from_secs(5))
            .with_transfer_timeout(Duration::from_secs(5));
        let server = RelayServer::bind(relay_config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let registry = server.registry();
        let relay_shutdown = ShutdownHandle::new();
        let handle = relay_shutdown.clone();
        tokio::spawn(async move { server.run(handle).await.unwrap() });

        let agent_config = AgentConfig::default()
            .with_relay_url(format!("ws://{addr}"))
            .with_device_id(DEVICE)
            .with_device_token(token)
            .with_recordings_dir(recordings.path())
            .with_chunk_size(128)
            .with_reconnect_delay(Duration::from_millis(100));
        let agent = Arc::new(Agent::new(agent_config));
        let agent_shutdown = ShutdownHandle::new();
        let agent_task = {
            let agent = agent.clone();
            let shutdown = agent_shutdown.clone();
            tokio::spawn(async move { agent.run(shutdown).await })
        };

        Self {
            addr,
            registry,
            relay_shutdown,
            agent,
            agent_shutdown,
            agent_task,
            http: reqwest::Client::new(),
            _recordings: recordings,
        }
    }

    /// Starts everything and waits until the agent's cameras are registered.
    async fn connected() -> Self {
        let stack = Self::start(TOKEN).await;
        for _ in 0..500 {
            if stack.registry.lookup("yard").await.is_some() {
                return stack;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("agent never registered its cameras");
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn get(&self, path: &str, range: Option<&str>) -> reqwest::Response {
        let mut request = self.http.get(self.url(path));
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }
        request.send().await.unwrap()
    }

    async fn json(&self, path: &str) -> Value {
        let response = self.get(path, None).await;
        assert_eq!(response.status(), StatusCode::OK, "{path}");
        response.json().await.unwrap()
    }

    async fn stop_agent(self) -> (Arc<Registry>, Arc<Agent>) {
        self.agent_shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.agent_task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        self.relay_shutdown.trigger();
        (self.registry, self.agent)
    }
}

fn file_path() -> String {
    format!("/api/devices/front/videos/{FILE}")
}

#[tokio::test]
async fn health_and_cameras() {
    let stack = Stack::connected().await;
    assert_eq!(stack.agent.state(), AgentState::Connected);

    let health = stack.json("/health").await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connected_devices"], 1);

    let cameras = stack.json("/api/cameras").await;
    assert_eq!(cameras["total"], 2);
    let pairs: Vec<(String, String)> = cameras["cameras"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| {
            (
                c["device_id"].as_str().unwrap().to_string(),
                c["camera_id"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        pairs,
        [
            (DEVICE.to_string(), "front".to_string()),
            (DEVICE.to_string(), "yard".to_string())
        ]
    );
}

#[tokio::test]
async fn byte_range_reads() {
    let stack = Stack::connected().await;
    let data = content(FILE_SIZE);

    let partial = stack.get(&file_path(), Some("bytes=100-199")).await;
    assert_eq!(partial.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(partial.headers()[CONTENT_RANGE], "bytes 100-199/1000");
    assert_eq!(partial.headers()[ACCEPT_RANGES], "bytes");
    assert_eq!(partial.headers()[CONTENT_TYPE], "video/mp4");
    assert_eq!(partial.bytes().await.unwrap(), &data[100..200]);

    let tail = stack.get(&file_path(), Some("bytes=900-")).await;
    assert_eq!(tail.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(tail.headers()[CONTENT_RANGE], "bytes 900-999/1000");
    assert_eq!(tail.bytes().await.unwrap(), &data[900..]);

    let full = stack.get(&file_path(), None).await;
    assert_eq!(full.status(), StatusCode::OK);
    assert!(full.headers().get(CONTENT_RANGE).is_none());
    assert_eq!(full.bytes().await.unwrap(), &data[..]);
}

#[tokio::test]
async fn head_reports_size() {
    let stack = Stack::connected().await;

    let url = stack.url(&file_path());
    let response = stack.http.head(url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_LENGTH], "1000");
    assert_eq!(response.headers()[ACCEPT_RANGES], "bytes");
}

#[tokio::test]
async fn device_errors_surface_as_server_errors() {
    let stack = Stack::connected().await;

    let missing = stack
        .get("/api/devices/front/videos/20990101_00:00.mp4", None)
        .await;
    assert_eq!(missing.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = missing.json().await.unwrap();
    assert!(body["detail"].as_str().unwrap().contains("File not found"));

    let out_of_range = stack.get(&file_path(), Some("bytes=500-1000")).await;
    assert_eq!(out_of_range.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = out_of_range.json().await.unwrap();
    assert!(body["detail"].as_str().unwrap().contains("Invalid range"));

    let empty = stack
        .get("/api/devices/front/videos/20240115_11:00.mp4", None)
        .await;
    assert_eq!(empty.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn listing_is_paginated_newest_first() {
    let stack = Stack::connected().await;

    let first = stack
        .json("/api/devices/yard/videos?page=1&page_size=60")
        .await;
    assert_eq!(first["total"], 130);
    assert_eq!(first["total_pages"], 3);
    assert_eq!(first["videos"].as_array().unwrap().len(), 60);
    assert_eq!(first["videos"][0]["filename"], "20240201_02:09.mp4");
    assert_eq!(first["videos"][0]["camera"], "yard");

    let third = stack
        .json("/api/devices/yard/videos?page=3&page_size=60")
        .await;
    assert_eq!(third["videos"].as_array().unwrap().len(), 10);

    let fourth = stack
        .json("/api/devices/yard/videos?page=4&page_size=60")
        .await;
    assert!(fourth["videos"].as_array().unwrap().is_empty());

    let filtered = stack
        .json("/api/devices/front/videos?date=20240115&hour=10")
        .await;
    assert_eq!(filtered["total"], 1);
    assert_eq!(filtered["videos"][0]["filename"], FILE);
    assert_eq!(filtered["videos"][0]["size"], FILE_SIZE);
    assert_eq!(filtered["videos"][0]["timestamp"], "2024-01-15T10:30:00");
}

#[tokio::test]
async fn concurrent_reads_share_the_tunnel() {
    let stack = Stack::connected().await;
    let data = content(FILE_SIZE);

    let ranges = [(0usize, 99usize), (250, 749), (900, 999), (10, 10)];
    let responses = futures_util::future::join_all(ranges.iter().map(|(start, end)| {
        let header = format!("bytes={start}-{end}");
        let url = stack.url(&file_path());
        let request = stack.http.get(url).header(RANGE, header);
        async move { request.send().await.unwrap().bytes().await.unwrap() }
    }))
    .await;

    for ((start, end), body) in ranges.iter().zip(responses) {
        assert_eq!(body, &data[*start..=*end]);
    }
}

#[tokio::test]
async fn stopping_the_agent_unregisters_the_device() {
    let stack = Stack::connected().await;
    let registry = stack.registry.clone();

    let (_, agent) = stack.stop_agent().await;
    assert_eq!(agent.state(), AgentState::Stopped);

    for _ in 0..500 {
        if registry.device_count().await == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("device still registered after the agent stopped");
}

#[tokio::test]
async fn wrong_token_never_registers() {
    let stack = Stack::start("not-the-token").await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(stack.registry.device_count().await, 0);
    assert_ne!(stack.agent.state(), AgentState::Stopped);

    let (registry, agent) = stack.stop_agent().await;
    assert_eq!(registry.device_count().await, 0);
    assert_eq!(agent.state(), AgentState::Stopped);
}
