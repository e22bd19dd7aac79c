//! Edge agent: tunnel connection, request dispatch, recording store
//!
//! The agent keeps one outbound WebSocket to the relay and answers the
//! `LIST_VIDEOS` and `READ_FILE` requests multiplexed over it from the
//! recordings on local disk.

pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod handler;
pub mod store;

pub use agent::{Agent, AgentState};
pub use cli::Cli;
pub use config::AgentConfig;
pub use error::{AgentError, AgentResult};
pub use handler::RequestHandler;
pub use store::{RangeReader, RecordingStore, StoreError};
