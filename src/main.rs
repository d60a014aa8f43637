mod config;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use gantry_core::ProtocolCore;
use gantry_mcp::{McpCore, ToolCatalogue};
use gantry_server::{run_stdio, ServerConfig};
use gantry_telemetry::init_telemetry;
use gantry_tools::register_builtin_tools;
use tracing::{error, info, warn};

use crate::config::{Cli, Transport};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let telemetry = match config::telemetry_config(&cli) {
        Ok(telemetry) => telemetry,
        Err(e) => {
            eprintln!("gantry: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_telemetry(&telemetry) {
        eprintln!("gantry: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // fail on a missing secret before anything else is built
    let transport = config::transport(&cli)?;

    let client = config::api_client(&cli)?;
    if client.is_none() {
        info!("workflow API not configured; API tools will report not configured");
    }
    let mut catalogue = ToolCatalogue::new();
    register_builtin_tools(&mut catalogue, client);
    let core: Arc<dyn ProtocolCore> = Arc::new(McpCore::new(catalogue));

    match transport {
        Transport::Http {
            credential,
            config: server_config,
        } => {
            let addr = server_config.bind_addr();
            let handle = gantry_server::start(server_config, credential, core)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;
            shutdown_signal().await;
            handle.shutdown().await;
        }
        Transport::Stdio => {
            info!(version = env!("CARGO_PKG_VERSION"), "starting stdio transport");
            run_stdio(
                core,
                tokio::io::stdin(),
                tokio::io::stdout(),
                ServerConfig::default().push_queue,
            )
            .await
            .context("stdio transport failed")?;
        }
    }
    info!("gantry stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutdown signal received");
}
