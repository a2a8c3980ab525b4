//! Main controller implementation.
//!
//! Builds the shared allocator and reconciler, restores allocator state from
//! the cluster, then runs the watchers, the resync loop and the metrics
//! endpoint until one of them stops.

use crate::config::ManagerConfig;
use crate::error::ControllerError;
use crate::metrics::{self, Metrics};
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use crds::{Network, Subnet};
use ipam::{AddressAllocator, RetentionPolicy};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Main controller for address management.
pub struct Controller {
    network_watcher: JoinHandle<Result<(), ControllerError>>,
    subnet_watcher: JoinHandle<Result<(), ControllerError>>,
    pod_watcher: JoinHandle<Result<(), ControllerError>>,
    statefulset_watcher: JoinHandle<Result<(), ControllerError>>,
    resync_loop: JoinHandle<Result<(), ControllerError>>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance.
    ///
    /// Fails when the allocator state cannot be restored: serving
    /// allocations without it could hand out addresses already in use.
    pub async fn new(config: ManagerConfig) -> Result<Self, ControllerError> {
        info!("Initializing netplane manager");

        let client = Client::try_default().await?;

        let metrics = Arc::new(Metrics::new()?);
        let metrics_server = tokio::spawn(metrics::serve(config.metrics_addr, Arc::clone(&metrics)));

        let allocator = Arc::new(AddressAllocator::new(RetentionPolicy::new(
            config.stateful_kinds.iter().cloned(),
        )));

        let (pod_api, statefulset_api): (Api<Pod>, Api<StatefulSet>) = match config.watch_namespace.as_deref() {
            Some(ns) => (Api::namespaced(client.clone(), ns), Api::namespaced(client.clone(), ns)),
            None => (Api::all(client.clone()), Api::all(client.clone())),
        };
        let network_api: Api<Network> = Api::all(client.clone());
        let subnet_api: Api<Subnet> = Api::all(client.clone());
        let concurrency = config.reconcile_concurrency;
        let resync_interval = config.resync_interval;

        let reconciler = Reconciler::new(client, allocator, metrics, config);

        info!("Restoring allocator state from existing records...");
        reconciler.startup_reconciliation().await?;
        info!("Startup reconciliation completed");

        let reconciler = Arc::new(reconciler);
        let watcher = Arc::new(Watcher::new(
            Arc::clone(&reconciler),
            network_api,
            subnet_api,
            pod_api,
            statefulset_api,
            concurrency,
        ));

        let network_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_networks().await })
        };
        let subnet_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_subnets().await })
        };
        let pod_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_pods().await })
        };
        let statefulset_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_statefulsets().await })
        };

        let resync_loop: JoinHandle<Result<(), ControllerError>> = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(resync_interval);
            // the first tick fires immediately, right after the restore
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = reconciler.resync().await {
                    warn!("Resync pass failed: {}", e);
                }
            }
        });

        Ok(Self {
            network_watcher,
            subnet_watcher,
            pod_watcher,
            statefulset_watcher,
            resync_loop,
            metrics_server,
        })
    }

    /// Runs until any task exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Netplane manager running");

        tokio::select! {
            result = &mut self.network_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Network watcher panicked: {}", e)))??;
            }
            result = &mut self.subnet_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Subnet watcher panicked: {}", e)))??;
            }
            result = &mut self.pod_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Pod watcher panicked: {}", e)))??;
            }
            result = &mut self.statefulset_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("StatefulSet watcher panicked: {}", e)))??;
            }
            result = &mut self.resync_loop => {
                result.map_err(|e| ControllerError::Watch(format!("Resync loop panicked: {}", e)))??;
            }
            result = &mut self.metrics_server => {
                result.map_err(|e| ControllerError::Watch(format!("Metrics server panicked: {}", e)))??;
            }
        }

        Ok(())
    }
}
