//! camrelay-relay entry point.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{info, warn};

use camrelay_core::{SignalHandler, TracingConfig, init_tracing};
use camrelay_relay::{RelayConfig, RelayResult, RelayServer};

/// camrelay-relay - HTTP relay for NAT-bound camera devices
#[derive(Debug, Parser)]
#[command(name = "camrelay-relay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "CAMRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Address to listen on
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Shared device token (`env::VAR` and `pass::path` references allowed)
    #[arg(long, env = "CAMRELAY_DEVICE_TOKEN", hide_env_values = true)]
    device_token: Option<String>,
}

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

async fn run(cli: Cli) -> RelayResult<()> {
    let mut config = match cli.config {
        Some(ref path) => RelayConfig::load_from(path)?,
        None => RelayConfig::load()?,
    };
    if let Some(bind) = cli.bind {
        config = config.with_bind(bind);
    }
    if let Some(token) = cli.device_token {
        config = config.with_device_token(token);
    }
    let config = config.resolve_token()?;

    if config.device_token == camrelay_relay::DEFAULT_DEVICE_TOKEN {
        warn!(
            "Using the default device token; set CAMRELAY_DEVICE_TOKEN to override it"
        );
    }

    let signal_handler = SignalHandler::new();
    signal_handler.spawn_listener();

    let server = RelayServer::bind(config).await?;
    info!(addr = %server.local_addr()?, "Starting relay");
    server.run(signal_handler.shutdown_handle()).await
}
