//! Relay server: listener, router and graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use camrelay_core::ShutdownHandle;

use crate::api::{self, AppState};
use crate::config::RelayConfig;
use crate::error::RelayResult;
use crate::registry::Registry;

/// A bound relay, ready to serve.
pub struct RelayServer {
    listener: TcpListener,
    state: AppState,
}

impl RelayServer {
    /// Binds the listener from the configuration.
    pub async fn bind(config: RelayConfig) -> RelayResult<Self> {
        let listener = TcpListener::bind(config.bind).await?;
        let state = AppState::new(Arc::new(Registry::new()), config);
        Ok(Self { listener, state })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> RelayResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The registry shared with every handler.
    pub fn registry(&self) -> Arc<Registry> {
        self.state.registry.clone()
    }

    /// Serves until `shutdown` triggers, then disconnects every device.
    pub async fn run(self, shutdown: ShutdownHandle) -> RelayResult<()> {
        let addr = self.listener.local_addr()?;
        let registry = self.state.registry.clone();
        let app = api::router(self.state);

        info!(addr = %addr, "Relay listening");

        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                shutdown.wait().await;
                info!("Shutting down, disconnecting devices");
                registry.disconnect_all().await;
            })
            .await?;

        info!("Relay stopped");
        Ok(())
    }
}
