//! camrelay-agent entry point.

use std::process::ExitCode;

use clap::Parser;
use tracing::{info, warn};

use camrelay_agent::{Agent, AgentConfig, AgentResult, Cli};
use camrelay_core::{SignalHandler, TracingConfig, init_tracing};
use camrelay_protocol::DEFAULT_DEVICE_TOKEN;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(TracingConfig::from_flags(cli.debug, cli.json_logs)) {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> AgentResult<()> {
    let config = match cli.config {
        Some(ref path) => AgentConfig::load_from(path)?,
        None => AgentConfig::load()?,
    };
    let config = cli.apply(config).resolve_token()?;

    if config.device_token == DEFAULT_DEVICE_TOKEN {
        warn!(
            "Using the default device token; set CAMRELAY_DEVICE_TOKEN to override it"
        );
    }

    let signal_handler = SignalHandler::new();
    signal_handler.spawn_listener();

    info!(
        device_id = %config.device_id,
        relay_url = %config.relay_url,
        recordings_dir = %config.recordings_dir.display(),
        "Starting agent"
    );
    let agent = Agent::new(config);
    agent.run(signal_handler.shutdown_handle()).await
}
