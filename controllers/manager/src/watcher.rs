//! Kubernetes resource watchers.
//!
//! Every watched kind goes through `watch_resource()`, which runs a
//! kube_runtime::Controller with reconnection, debouncing and a per-object
//! Fibonacci requeue on failure.

use crate::error::ControllerError;
use crate::reconcile_helpers::resource_key;
use crate::reconciler::Reconciler;
use crds::{Network, Subnet};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube_runtime::{
    Controller, watcher,
    controller::{Action, Config as ControllerConfig},
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

async fn watch_resource<K, F>(
    api: Api<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &'static str,
    concurrency: u16,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = resource_key(obj.meta());
        ctx.increment_error(&key);
        let (backoff, error_count) = ctx.get_backoff_for_resource(&key);
        error!(
            "Reconciliation error for {} {} (attempt {}), retrying in {:?}: {}",
            resource_name, key, error_count, backoff, error
        );
        Action::requeue(backoff)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let key = resource_key(obj.meta());
            debug!("Reconciling {} {}", resource_name, key);
            let action = reconcile_fn(Arc::clone(&ctx), obj).await?;
            ctx.reset_error(&key);
            Ok::<Action, ControllerError>(action)
        }
    };

    // batch bursts of updates to one object into a single reconcile
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(concurrency);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            if let Err(e) = res {
                debug!("Controller error for {}: {}", resource_name, e);
            }
        })
        .await;

    Ok(())
}

/// Watches the kinds the manager reconciles.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    network_api: Api<Network>,
    subnet_api: Api<Subnet>,
    pod_api: Api<Pod>,
    statefulset_api: Api<StatefulSet>,
    concurrency: u16,
}

impl Watcher {
    pub fn new(
        reconciler: Arc<Reconciler>,
        network_api: Api<Network>,
        subnet_api: Api<Subnet>,
        pod_api: Api<Pod>,
        statefulset_api: Api<StatefulSet>,
        concurrency: u16,
    ) -> Self {
        Self {
            reconciler,
            network_api,
            subnet_api,
            pod_api,
            statefulset_api,
            concurrency,
        }
    }

    pub async fn watch_networks(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.network_api.clone(),
            Arc::clone(&self.reconciler),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_network(&resource).await }),
            "Network",
            self.concurrency,
        )
        .await
    }

    pub async fn watch_subnets(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.subnet_api.clone(),
            Arc::clone(&self.reconciler),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_subnet(&resource).await }),
            "Subnet",
            self.concurrency,
        )
        .await
    }

    pub async fn watch_pods(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.pod_api.clone(),
            Arc::clone(&self.reconciler),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_pod(&resource).await }),
            "Pod",
            self.concurrency,
        )
        .await
    }

    pub async fn watch_statefulsets(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.statefulset_api.clone(),
            Arc::clone(&self.reconciler),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_statefulset(&resource).await }),
            "StatefulSet",
            self.concurrency,
        )
        .await
    }
}
