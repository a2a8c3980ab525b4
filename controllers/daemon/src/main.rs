//! Netplane Daemon
//!
//! Per-node agent:
//! - activates the underlay IPv4 addresses bound to this node (gateway
//!   probe, duplicate detection, gratuitous announcement) and records the
//!   result on the IPInstance
//! - watches RemoteVtep / RemoteSubnet and signals forwarding-plane resyncs
//!   when remote topology changes

mod activation;
mod config;
mod error;
mod topology_sync;

use crate::activation::Activator;
use crate::config::DaemonConfig;
use crate::error::DaemonError;
use crate::topology_sync::ForwardingSink;
use arp::ActivationValidator;
use kube::Client;
use std::sync::Arc;
use tokio::task::JoinSet;
use topology::TopologyReconciler;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), DaemonError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting netplane daemon");

    let config = DaemonConfig::from_env()?;

    info!("Configuration:");
    info!("  Node: {}", config.node_name);
    info!(
        "  Underlay interface: {}",
        config.underlay_interface.as_deref().unwrap_or("none (activation disabled)")
    );
    info!("  ARP timeout: {:?}", config.arp_timeout);
    info!("  Resync workers: {}", config.queue_workers);

    let client = Client::try_default().await?;
    let mut tasks: JoinSet<Result<(), DaemonError>> = JoinSet::new();

    let reconciler = TopologyReconciler::default();
    topology_sync::spawn(
        &mut tasks,
        client.clone(),
        reconciler.clone(),
        Arc::new(ForwardingSink::default()),
        config.queue_workers,
    );

    if let Some(interface) = config.underlay_interface.clone() {
        let activator = Arc::new(Activator::new(
            client,
            config.node_name.clone(),
            interface,
            ActivationValidator::new(config.arp_timeout),
        ));
        tasks.spawn(activator.run());
    }

    // every task runs for the life of the daemon; the first to stop ends it
    let outcome = match tasks.join_next().await {
        Some(Ok(result)) => result,
        Some(Err(e)) => Err(DaemonError::Watch(format!("daemon task panicked: {}", e))),
        None => Ok(()),
    };
    if let Err(e) = &outcome {
        error!("Daemon stopping: {}", e);
    }
    reconciler.shutdown();
    tasks.abort_all();
    outcome
}
