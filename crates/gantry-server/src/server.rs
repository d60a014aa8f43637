use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use gantry_core::{Credential, ProtocolCore};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::gateway::{build_router, GatewayState};
use crate::reaper::ReaperConfig;
use crate::registry::SessionRegistry;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Bind the listener, start the reaper and serve in the background.
pub async fn start(
    config: ServerConfig,
    credential: Credential,
    core: Arc<dyn ProtocolCore>,
) -> Result<ServerHandle, std::io::Error> {
    let listener = TcpListener::bind(config.bind_addr()).await?;
    let local_addr = listener.local_addr()?;

    let registry = Arc::new(SessionRegistry::new());
    registry.start_reaper(ReaperConfig {
        interval: config.sweep_interval,
        idle_timeout: config.idle_timeout,
    });

    let state = GatewayState {
        registry: Arc::clone(&registry),
        core,
        credential: Arc::new(credential),
        config: Arc::new(config),
    };
    let router = build_router(state);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone().cancelled_owned();
    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await
        {
            error!(error = %e, "server error");
        }
    });

    info!(addr = %local_addr, "gateway listening");

    Ok(ServerHandle {
        local_addr,
        registry,
        shutdown,
        task,
    })
}

/// Handle returned by [`start`]. Dropping it leaves the server running.
pub struct ServerHandle {
    local_addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Stop accepting connections, close every session and wait for the
    /// server task to drain.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.registry.stop_reaper();
        let closed = self.registry.close_all();
        info!(closed, "shutting down gateway");
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.task).await.is_err() {
            warn!("shutdown timed out after {SHUTDOWN_TIMEOUT:?}");
        }
    }
}
