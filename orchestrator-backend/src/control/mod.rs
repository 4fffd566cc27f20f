//! HTTP control surface.
//!
//! Exposes pool occupancy, per-scenario status and a graceful-shutdown
//! trigger. The server stops accepting connections once the shutdown token
//! is cancelled.

pub mod routes;

pub use routes::{ControlError, ControlState, router};

use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Serves the control router on `addr` until `shutdown` fires
pub async fn serve(addr: SocketAddr, state: ControlState, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind control surface on {}", addr))?;
    info!("Control surface listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Control surface server error")?;

    info!("Control surface stopped");
    Ok(())
}
