//! kubeherd Control Plane
//!
//! Runs the action registry, the node observer and the recurring capacity
//! service. Only the
//! in-memory development backend (memory store, mock providers, static
//! inspector) ships with this binary.

use std::sync::Arc;

use anyhow::Result;
use herd_control_plane::{
    actions::ActionRegistry,
    config,
    inspector::StaticInspector,
    provider::{MockProvider, Providers},
    scheduler::{CapacityService, NodeObserver, RecurringWorker},
    state::ControlPlane,
    store::Store,
};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to HERD_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting kubeherd control plane");

    if !config.dev_mode {
        anyhow::bail!("no production record store or provider drivers are configured; set HERD_DEV=1");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (registry, registry_handle) = ActionRegistry::spawn(shutdown_rx.clone());
    let providers = ["aws", "digitalocean"]
        .into_iter()
        .fold(Providers::new(), |providers, name| {
            providers.with(Arc::new(MockProvider::new(name)))
        });
    let plane = ControlPlane::new(
        Store::memory(),
        registry,
        providers,
        Arc::new(StaticInspector::new()),
        config.node_sizes.clone(),
    );
    info!("Development backend initialized");

    let observer = RecurringWorker::new(
        Arc::new(NodeObserver::new(plane.clone())),
        config.node_observer_interval,
    );
    let observer_handle = {
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { observer.run(shutdown_rx).await })
    };

    let capacity_handle = if config.capacity.enabled {
        let worker = RecurringWorker::new(
            Arc::new(CapacityService::new(plane.clone(), config.capacity.clone())),
            config.capacity.interval,
        );
        let shutdown_rx = shutdown_rx.clone();
        Some(tokio::spawn(async move { worker.run(shutdown_rx).await }))
    } else {
        info!("Capacity service disabled");
        None
    };

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);

    if let Some(handle) = capacity_handle {
        if let Err(e) = tokio::time::timeout(shutdown_timeout, handle).await {
            warn!(error = %e, "Capacity worker did not shut down in time");
        }
    }

    if let Err(e) = tokio::time::timeout(shutdown_timeout, observer_handle).await {
        warn!(error = %e, "Node observer did not shut down in time");
    }

    if let Err(e) = tokio::time::timeout(shutdown_timeout, registry_handle).await {
        warn!(error = %e, "Action registry did not shut down in time");
    }

    info!("Control plane shutdown complete");
    Ok(())
}
