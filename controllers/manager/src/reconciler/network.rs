//! Network and Subnet reconciliation.

use super::Reconciler;
use crate::error::ControllerError;
use crate::reconcile_helpers::{
    add_finalizer_patch, eligible_networks, has_finalizer, network_status_patch, remove_finalizer_patch,
    subnet_status_patch,
};
use crds::{NETWORK_FINALIZER, Network, NetworkType, SUBNET_FINALIZER, Subnet};
use ipam::{Criteria, IpamError, SubnetConfig};
use kube::api::{Patch, PatchParams};
use kube_runtime::controller::Action;
use std::collections::BTreeMap;
use std::sync::PoisonError;
use tracing::{debug, info};

impl Reconciler {
    /// Registers a network and its node selector with the allocator.
    pub(crate) fn load_network(&self, network: &Network) {
        let Some(name) = network.metadata.name.as_deref() else {
            return;
        };
        self.allocator.upsert_network(name, network.spec.network_type);
        self.node_selectors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), network.spec.node_selector.clone());
    }

    /// Subnets a pod on a node with `node_labels` may draw underlay
    /// addresses from, narrowed to the pinned network when `criteria` names
    /// one. Overlay networks span every node, so no filter applies.
    pub(crate) fn eligible_subnets(&self, criteria: &Criteria, node_labels: &BTreeMap<String, String>) -> Option<Vec<String>> {
        if criteria.network_type != NetworkType::Underlay {
            return None;
        }
        let selectors = self.node_selectors.read().unwrap_or_else(PoisonError::into_inner);
        let mut subnets: Vec<String> = eligible_networks(&selectors, node_labels, criteria.network.as_deref())
            .into_iter()
            .flat_map(|network| self.allocator.subnets_of(network))
            .collect();
        subnets.sort();
        Some(subnets)
    }

    pub async fn reconcile_network(&self, network: &Network) -> Result<Action, ControllerError> {
        let name = network
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ControllerError::InvalidConfig("Network without name".to_string()))?;

        if network.metadata.deletion_timestamp.is_some() {
            if !has_finalizer(&network.metadata, NETWORK_FINALIZER) {
                return Ok(Action::await_change());
            }
            let subnets = self.allocator.subnets_of(name);
            if !subnets.is_empty() {
                return Err(ControllerError::Finalizer(format!(
                    "network {} still has subnets: {}",
                    name,
                    subnets.join(", ")
                )));
            }
            self.allocator.remove_network(name);
            self.node_selectors
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(name);
            self.network_api
                .patch(
                    name,
                    &PatchParams::default(),
                    &Patch::Merge(&remove_finalizer_patch(&network.metadata, NETWORK_FINALIZER)),
                )
                .await?;
            info!("Network {} removed", name);
            return Ok(Action::await_change());
        }

        if !has_finalizer(&network.metadata, NETWORK_FINALIZER) {
            self.network_api
                .patch(
                    name,
                    &PatchParams::default(),
                    &Patch::Merge(&add_finalizer_patch(&network.metadata, NETWORK_FINALIZER)),
                )
                .await?;
        }

        self.load_network(network);
        debug!("Network {} ({}) registered", name, network.spec.network_type);

        if let Some(patch) = network_status_patch(network.status.as_ref(), self.allocator.subnets_of(name).len()) {
            self.network_api
                .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
        }

        Ok(Action::requeue(self.config.resync_interval))
    }

    pub async fn reconcile_subnet(&self, subnet: &Subnet) -> Result<Action, ControllerError> {
        let name = subnet
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ControllerError::InvalidConfig("Subnet without name".to_string()))?;

        if subnet.metadata.deletion_timestamp.is_some() {
            if !has_finalizer(&subnet.metadata, SUBNET_FINALIZER) {
                return Ok(Action::await_change());
            }
            match self.allocator.remove_subnet(name) {
                Ok(()) | Err(IpamError::UnknownSubnet(_)) => {}
                Err(e) => return Err(e.into()),
            }
            self.subnet_api
                .patch(
                    name,
                    &PatchParams::default(),
                    &Patch::Merge(&remove_finalizer_patch(&subnet.metadata, SUBNET_FINALIZER)),
                )
                .await?;
            info!("Subnet {} removed", name);
            return Ok(Action::await_change());
        }

        if !has_finalizer(&subnet.metadata, SUBNET_FINALIZER) {
            self.subnet_api
                .patch(
                    name,
                    &PatchParams::default(),
                    &Patch::Merge(&add_finalizer_patch(&subnet.metadata, SUBNET_FINALIZER)),
                )
                .await?;
        }

        let usage = self.allocator.upsert_subnet(SubnetConfig::from_crd(subnet)?)?;
        debug!(
            "Subnet {} of network {}: {}/{} used",
            name, subnet.spec.network, usage.used, usage.total
        );

        if let Some(patch) = subnet_status_patch(subnet.status.as_ref(), usage) {
            self.subnet_api
                .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
        }

        // usage moves with pod churn, so the status is refreshed periodically
        Ok(Action::requeue(self.config.resync_interval))
    }
}
