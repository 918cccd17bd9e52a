pub mod api;
pub mod auth;
pub mod sweeper;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::CoordinatorConfig;
use crate::error::Result;
use crate::registry::Registry;

/// Run the coordinator until the shutdown token fires: the HTTP protocol
/// surface plus the background lease sweeper, sharing one registry.
pub async fn run_coordinator(
    config: CoordinatorConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    if config.api_key.is_empty() {
        tracing::warn!("API key is empty; accepting unauthenticated requests");
    }

    let registry = Arc::new(Registry::new(config.clone()));

    let sweeper_registry = registry.clone();
    let sweeper_shutdown = shutdown.clone();
    let sweep_interval = config.sweep_interval;
    tokio::spawn(async move {
        sweeper::run_sweeper(sweeper_registry, sweep_interval, sweeper_shutdown).await;
    });

    let app = api::router(api::ApiState { registry });

    tracing::info!(addr = %config.bind_addr, "Starting fleet coordinator");
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    tracing::info!("Coordinator stopped");
    Ok(())
}
