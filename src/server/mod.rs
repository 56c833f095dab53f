// ABOUTME: Bridge server exposing container TTYs over WebSocket at /ws/<container id>

pub mod bridge;
pub mod routes;

pub use bridge::{is_valid_container_id, run_session, Outbound, SessionEnd};
pub use routes::{router, AppState, HealthResponse};

use crate::config::ServerConfig;
use crate::docker::{ContainerBackend, DockerBackend};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Connect to Docker and serve until ctrl-c
pub async fn serve(config: ServerConfig) -> Result<()> {
    let backend = DockerBackend::new(config.clone())
        .await
        .context("Failed to connect to Docker")?;
    serve_with(config, Arc::new(backend)).await
}

pub async fn serve_with(config: ServerConfig, backend: Arc<dyn ContainerBackend>) -> Result<()> {
    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!("Listening on {} (image {})", listener.local_addr()?, config.image);

    let app = router(AppState::new(backend, config.image));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
