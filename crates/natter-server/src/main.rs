use anyhow::Result;
use natter_relay::ChatServer;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod config;
mod telemetry;

pub use config::ServerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let server_config = ServerConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load server configuration: {}", e))?;

    telemetry::init(server_config.log_format)
        .map_err(|e| anyhow::anyhow!("Failed to init telemetry: {}", e))?;

    info!("Natter Server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    server_config.log_config();

    let server = ChatServer::bind(server_config.relay.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start chat relay: {}", e))?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            shutdown.cancel();
        }
    });

    server.run(shutdown).await?;

    telemetry::shutdown();

    Ok(())
}

/// Wait for Ctrl-C or, on Unix, SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C, shutting down"),
        Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
    }
}
