//! Live device connections and the camera to device mapping.
//!
//! A camera resolves to the connected device whose most recent
//! `REGISTER_CAMERAS` listed it. Each registration is stamped with a
//! registry-wide generation so that, when two devices claim the same camera,
//! the later registration wins.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock as SyncRwLock;
use serde::Serialize;
use tokio::sync::{RwLock, mpsc, watch};
use tracing::info;

use camrelay_protocol::Frame;

use crate::correlator::Correlator;

/// Camera list of one device, stamped with the registration that set it.
#[derive(Debug, Default)]
struct CameraClaim {
    cameras: Vec<String>,
    generation: u64,
}

/// One authenticated device tunnel.
pub struct DeviceConnection {
    device_id: String,
    conn_id: u64,
    correlator: Correlator,
    cameras: SyncRwLock<CameraClaim>,
    closed: watch::Sender<bool>,
}

impl DeviceConnection {
    fn new(device_id: String, conn_id: u64, outbound: mpsc::Sender<Frame>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            correlator: Correlator::new(device_id.clone(), outbound),
            device_id,
            conn_id,
            cameras: SyncRwLock::new(CameraClaim::default()),
            closed,
        }
    }

    /// Device identifier from the tunnel URL.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Distinguishes this tunnel from earlier or later ones for the same device.
    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    /// The connection's pending-request table.
    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    /// Cameras from the latest registration.
    pub fn cameras(&self) -> Vec<String> {
        self.cameras.read().cameras.clone()
    }

    /// True once the connection has been closed.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Completes once the connection is closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Replaces the camera list wholesale.
    fn set_cameras(&self, cameras: Vec<String>, generation: u64) {
        let mut claim = self.cameras.write();
        claim.cameras = cameras;
        claim.generation = generation;
    }

    /// Generation of the registration that lists `camera_id`, if any.
    fn claim_on(&self, camera_id: &str) -> Option<u64> {
        let claim = self.cameras.read();
        claim
            .cameras
            .iter()
            .any(|camera| camera == camera_id)
            .then_some(claim.generation)
    }

    /// Stops the receive loop and writer and fails all pending requests.
    /// Idempotent.
    fn close(&self) -> usize {
        self.closed.send_replace(true);
        self.correlator.fail_all()
    }
}

/// A `(device, camera)` pair as served by `GET /api/cameras`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraEntry {
    /// Device currently serving the camera.
    pub device_id: String,
    /// Camera identifier.
    pub camera_id: String,
}

/// All live device connections.
#[derive(Default)]
pub struct Registry {
    devices: RwLock<HashMap<String, Arc<DeviceConnection>>>,
    next_conn_id: AtomicU64,
    generation: AtomicU64,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly authenticated tunnel.
    ///
    /// An existing connection with the same device id is closed first, so its
    /// pending requests fail with `DeviceDisconnected`.
    pub async fn connect(
        &self,
        device_id: &str,
        outbound: mpsc::Sender<Frame>,
    ) -> Arc<DeviceConnection> {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed) + 1;
        let conn = Arc::new(DeviceConnection::new(
            device_id.to_string(),
            conn_id,
            outbound,
        ));

        let previous = self
            .devices
            .write()
            .await
            .insert(device_id.to_string(), conn.clone());

        if let Some(previous) = previous {
            let failed = previous.close();
            info!(
                device_id = %device_id,
                failed_requests = failed,
                "Replaced existing connection for device"
            );
        }
        info!(device_id = %device_id, conn_id, "Device connected");
        conn
    }

    /// Removes a device and closes its connection. Returns false when the
    /// device was not connected.
    pub async fn disconnect(&self, device_id: &str) -> bool {
        let removed = self.devices.write().await.remove(device_id);
        match removed {
            Some(conn) => {
                Self::close_and_log(&conn);
                true
            }
            None => false,
        }
    }

    /// Like [`Registry::disconnect`], but only if `conn_id` is still the
    /// registered connection for the device. A replaced tunnel uses this so
    /// its shutdown does not evict its successor.
    pub async fn disconnect_if(&self, device_id: &str, conn_id: u64) -> bool {
        let removed = {
            let mut devices = self.devices.write().await;
            match devices.get(device_id) {
                Some(conn) if conn.conn_id == conn_id => devices.remove(device_id),
                _ => None,
            }
        };
        match removed {
            Some(conn) => {
                Self::close_and_log(&conn);
                true
            }
            None => false,
        }
    }

    /// Closes every connection; used on relay shutdown.
    pub async fn disconnect_all(&self) {
        let drained: Vec<_> = self.devices.write().await.drain().collect();
        for (_, conn) in drained {
            Self::close_and_log(&conn);
        }
    }

    /// Looks a device up by its id.
    pub async fn get_device(&self, device_id: &str) -> Option<Arc<DeviceConnection>> {
        self.devices.read().await.get(device_id).cloned()
    }

    /// Finds the device whose latest registration lists `camera_id`.
    pub async fn get_device_by_camera(&self, camera_id: &str) -> Option<Arc<DeviceConnection>> {
        self.devices
            .read()
            .await
            .values()
            .filter_map(|conn| conn.claim_on(camera_id).map(|claim| (claim, conn)))
            .max_by_key(|(claim, _)| *claim)
            .map(|(_, conn)| conn.clone())
    }

    /// Resolves an identifier from the HTTP surface: camera id first, then
    /// device id.
    pub async fn lookup(&self, id: &str) -> Option<Arc<DeviceConnection>> {
        match self.get_device_by_camera(id).await {
            Some(conn) => Some(conn),
            None => self.get_device(id).await,
        }
    }

    /// Replaces a device's camera list.
    pub fn register_cameras(&self, conn: &DeviceConnection, cameras: Vec<String>) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            device_id = %conn.device_id,
            cameras = ?cameras,
            "Cameras registered"
        );
        conn.set_cameras(cameras, generation);
    }

    /// Flattens every device's camera list into `(device, camera)` pairs,
    /// sorted by device then camera.
    pub async fn list_all_cameras(&self) -> Vec<CameraEntry> {
        let devices = self.devices.read().await;
        let mut entries: Vec<CameraEntry> = devices
            .values()
            .flat_map(|conn| {
                conn.cameras().into_iter().map(|camera_id| CameraEntry {
                    device_id: conn.device_id.clone(),
                    camera_id,
                })
            })
            .collect();
        entries.sort_by(|a, b| {
            (a.device_id.as_str(), a.camera_id.as_str())
                .cmp(&(b.device_id.as_str(), b.camera_id.as_str()))
        });
        entries
    }

    /// Number of connected devices.
    pub async fn device_count(&self) -> usize {
        self.devices.read().await.len()
    }

    fn close_and_log(conn: &DeviceConnection) {
        let failed = conn.close();
        info!(
            device_id = %conn.device_id,
            conn_id = conn.conn_id,
            failed_requests = failed,
            "Device disconnected"
        );
    }
}
