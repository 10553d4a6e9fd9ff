use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::signal;
use tracing::info;

pub async fn create_listener(bind_address: &str) -> Result<tokio::net::TcpListener> {
    let addr: SocketAddr = bind_address
        .parse()
        .with_context(|| format!("Invalid bind address '{bind_address}'"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("[Server] listening on http://{}", addr);
    Ok(listener)
}

#[allow(
    clippy::expect_used,
    reason = "Signal handlers are critical infrastructure, panic is appropriate on failure"
)]
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("[Server] received Ctrl+C, shutting down"),
        () = terminate => info!("[Server] received SIGTERM, shutting down"),
    }
}
