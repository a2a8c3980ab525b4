//! Reconcilers driving the address allocator from cluster state.
//!
//! The allocator is the in-memory source of truth while the manager runs;
//! IPInstance resources are its persisted form and are read back on startup.

mod network;
mod pod;
mod resync;
mod statefulset;

use crate::backoff::BackoffTable;
use crate::config::ManagerConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconcile_helpers::{instance_status_patch, records_from_instances};
use crds::{FIELD_MANAGER, IPInstance, InstancePhase, Network, Subnet, sort_ip_instances};
use ipam::{AddressAllocator, AddressRecord, SubnetConfig};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams};
use kube::{Api, Client};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reconciles pods, networks, subnets and stateful owners against the allocator.
pub struct Reconciler {
    pub(crate) client: Client,
    pub(crate) allocator: Arc<AddressAllocator>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) config: ManagerConfig,
    network_api: Api<Network>,
    subnet_api: Api<Subnet>,
    /// Node selectors of underlay networks, by network name
    node_selectors: RwLock<HashMap<String, BTreeMap<String, String>>>,
    /// Backoff of failing resources, dropped on success
    backoff: BackoffTable,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        client: Client,
        allocator: Arc<AddressAllocator>,
        metrics: Arc<Metrics>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            network_api: Api::all(client.clone()),
            subnet_api: Api::all(client.clone()),
            client,
            allocator,
            metrics,
            config,
            node_selectors: RwLock::new(HashMap::new()),
            backoff: BackoffTable::new(5, 300),
        }
    }

    /// IPInstance API for one namespace
    pub(crate) fn instances(&self, namespace: &str) -> Api<IPInstance> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// IPInstance API covering every watched namespace
    pub(crate) fn watched_instances(&self) -> Api<IPInstance> {
        match self.config.watch_namespace.as_deref() {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    /// Rebuilds allocator state from the cluster before any watcher runs.
    ///
    /// Networks and subnets are loaded first so that every persisted record
    /// finds its pool; records are then replayed in family/name order.
    pub async fn startup_reconciliation(&self) -> Result<(), ControllerError> {
        info!("Starting startup reconciliation");

        let networks = self.network_api.list(&ListParams::default()).await?;
        for network in &networks.items {
            self.load_network(network);
        }
        info!("Loaded {} networks", networks.items.len());

        let subnets = self.subnet_api.list(&ListParams::default()).await?;
        let mut loaded = 0;
        for subnet in &subnets.items {
            match SubnetConfig::from_crd(subnet).and_then(|config| self.allocator.upsert_subnet(config)) {
                Ok(_) => loaded += 1,
                Err(e) => warn!(
                    "Subnet {} not loaded: {}",
                    subnet.metadata.name.as_deref().unwrap_or_default(),
                    e
                ),
            }
        }
        info!("Loaded {}/{} subnets", loaded, subnets.items.len());

        let mut instances = self.watched_instances().list(&ListParams::default()).await?.items;
        sort_ip_instances(&mut instances);
        let report = self.allocator.restore(records_from_instances(&instances));
        for name in &report.conflicts {
            warn!("IPInstance {} claims an address already restored for another record", name);
        }
        for name in &report.orphaned {
            warn!("IPInstance {} does not belong to any known subnet", name);
        }
        info!(
            "Restored {} active and {} retained addresses",
            report.active, report.retained
        );

        self.metrics.set_ready();
        Ok(())
    }

    /// Applies allocated records, server-side, as IPInstances.
    pub(crate) async fn apply_records(&self, records: &[AddressRecord]) -> Result<(), ControllerError> {
        let params = PatchParams::apply(FIELD_MANAGER).force();
        for record in records {
            let api = self.instances(&record.namespace);
            api.patch(&record.name, &params, &Patch::Apply(&record.to_instance()))
                .await?;
            debug!("Applied IPInstance {}/{}", record.namespace, record.name);
        }
        Ok(())
    }

    /// Resets the activation phase of freshly bound records so the node
    /// daemon validates them again.
    pub(crate) async fn mark_pending(&self, records: &[AddressRecord]) -> Result<(), ControllerError> {
        let patch = instance_status_patch(InstancePhase::Pending, None);
        for record in records {
            self.instances(&record.namespace)
                .patch_status(&record.name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
        }
        Ok(())
    }

    /// Deletes the IPInstances of released or purged records.
    pub(crate) async fn delete_records(&self, records: &[AddressRecord]) -> Result<(), ControllerError> {
        for record in records {
            self.delete_instance(&record.namespace, &record.name).await?;
        }
        Ok(())
    }

    pub(crate) async fn delete_instance(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        let api = self.instances(namespace);
        if api.get_opt(name).await?.is_none() {
            return Ok(());
        }
        api.delete(name, &DeleteParams::default()).await?;
        debug!("Deleted IPInstance {}/{}", namespace, name);
        Ok(())
    }

    /// Get backoff duration for a resource and advance its sequence
    pub fn get_backoff_for_resource(&self, resource_key: &str) -> (Duration, u32) {
        self.backoff.next_backoff(resource_key)
    }

    /// Increment error count for a resource
    pub fn increment_error(&self, resource_key: &str) {
        self.backoff.increment_error(resource_key);
    }

    /// Forget a resource's backoff (on successful reconciliation)
    pub fn reset_error(&self, resource_key: &str) {
        self.backoff.reset(resource_key);
    }
}
