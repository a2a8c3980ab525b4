//! Netplane Manager
//!
//! Cluster-wide address manager:
//! - Network / Subnet: registers address pools with the allocator
//! - Pod: allocates addresses on scheduling, releases or retains them on deletion
//! - StatefulSet: purges retained addresses of ordinals that no longer exist
//!
//! Allocations are persisted as IPInstance resources, which the node daemon
//! activates on the link.

mod backoff;
mod config;
mod controller;
mod error;
mod metrics;
mod reconcile_helpers;
mod reconciler;
mod test_utils;
mod watcher;

use crate::config::ManagerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting netplane manager");

    let config = ManagerConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Default network type: {}", config.default_network_type);
    info!("  Default IP family: {}", config.default_ip_family);
    info!("  Stateful kinds: {}", config.stateful_kinds.join(", "));
    info!("  Resync interval: {:?}", config.resync_interval);
    info!("  Metrics address: {}", config.metrics_addr);
    info!("  Reconcile concurrency: {}", config.reconcile_concurrency);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
