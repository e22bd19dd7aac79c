//! Core types: recordings, pagination, secrets, tracing, shutdown signals

pub mod duration_secs;
pub mod secret;
pub mod signals;
pub mod tracing;
pub mod video;

pub use secret::{SecretError, resolve_secret};
pub use signals::{ShutdownHandle, SignalHandler};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
pub use video::{
    DEFAULT_PAGE_SIZE, Page, VideoFilter, VideoInfo, paginate, parse_recording_timestamp,
};
