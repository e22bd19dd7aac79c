//! Camera relay: HTTP front door for NAT-bound edge devices.
//!
//! Devices keep one WebSocket tunnel open to the relay. HTTP requests for
//! recordings are turned into tunnel requests, correlated by id, and the
//! device's framed replies are reassembled into ordinary HTTP responses:
//!
//! - [`Correlator`]: per-connection pending-request table
//! - [`demux`]: classifies inbound tunnel frames
//! - [`Registry`]: live devices and the camera to device mapping
//! - [`bridge`]: HTTP `Range` to `READ_FILE` and back
//! - [`api`]: axum routes, including the tunnel endpoint
//!
//! # Example
//!
//! ```rust,no_run
//! use camrelay_core::ShutdownHandle;
//! use camrelay_relay::{RelayConfig, RelayServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = RelayServer::bind(RelayConfig::default()).await?;
//!     server.run(ShutdownHandle::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod bridge;
mod config;
mod correlator;
pub mod demux;
mod error;
mod registry;
mod server;
mod tunnel;

pub use api::{ApiError, AppState, router};
pub use bridge::{ByteRange, FileReply, FileRequest, parse_range};
pub use config::{DEFAULT_DEVICE_TOKEN, RelayConfig};
pub use correlator::Correlator;
pub use demux::{Disposition, DropReason};
pub use error::{RelayError, RelayResult};
pub use registry::{CameraEntry, DeviceConnection, Registry};
pub use server::RelayServer;
