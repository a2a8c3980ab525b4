//! Pod reconciliation: allocate on scheduling, release or retain on deletion.

use super::Reconciler;
use crate::error::ControllerError;
use crate::reconcile_helpers::{
    PodDisposition, add_finalizer_patch, criteria_for_pod, has_finalizer, pod_disposition, remove_finalizer_patch, resource_key,
};
use crds::{NetworkType, POD_FINALIZER};
use ipam::WorkloadIdentity;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::Api;
use kube::api::{Patch, PatchParams};
use kube_runtime::controller::Action;
use tracing::{debug, info};

impl Reconciler {
    pub async fn reconcile_pod(&self, pod: &Pod) -> Result<Action, ControllerError> {
        let key = resource_key(&pod.metadata);
        match pod_disposition(pod, POD_FINALIZER) {
            PodDisposition::Skip(reason) => {
                debug!("Skipping pod {}: {}", key, reason);
                Ok(Action::await_change())
            }
            PodDisposition::Release => {
                self.release_pod(pod).await?;
                Ok(Action::await_change())
            }
            // re-applied periodically so a record lost to a concurrent resync comes back
            PodDisposition::Allocate => match self.allocate_pod(pod).await {
                Ok(()) => Ok(Action::requeue(self.config.resync_interval)),
                Err(e) => {
                    self.metrics.record_failure(e.reason());
                    Err(e)
                }
            },
        }
    }

    async fn allocate_pod(&self, pod: &Pod) -> Result<(), ControllerError> {
        let identity = WorkloadIdentity::from_pod(pod, self.allocator.policy())?;
        let criteria = criteria_for_pod(
            pod.metadata.annotations.as_ref(),
            self.config.default_network_type,
            self.config.default_ip_family,
            |network| self.allocator.network_type(network),
        )?;

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &identity.namespace);
        if !has_finalizer(&pod.metadata, POD_FINALIZER) {
            pods.patch(
                &identity.pod_name,
                &PatchParams::default(),
                &Patch::Merge(&add_finalizer_patch(&pod.metadata, POD_FINALIZER)),
            )
            .await?;
        }

        let already_held = self
            .allocator
            .lease(&identity.lease_key())
            .is_some_and(|records| records.iter().all(|r| r.binding.pod_uid == identity.pod_uid));

        let previous = self.allocator.release_previous(&identity);
        if !previous.is_empty() {
            self.delete_records(&previous.released).await?;
            self.metrics.record_releases(previous.released.len());
            self.metrics.record_retentions(previous.retained.len());
            info!(
                "Pod {} recreated: {} addresses of the previous pod released, {} retained",
                identity,
                previous.released.len(),
                previous.retained.len()
            );
        }

        let eligible = if criteria.network_type == NetworkType::Underlay {
            let nodes: Api<Node> = Api::all(self.client.clone());
            let labels = nodes.get(&identity.node_name).await?.metadata.labels.unwrap_or_default();
            self.eligible_subnets(&criteria, &labels)
        } else {
            None
        };

        let records = self.allocator.allocate(&identity, &criteria, eligible.as_deref())?;
        self.apply_records(&records).await?;

        if !already_held {
            self.mark_pending(&records).await?;
            self.metrics.record_allocations(records.len());
            for record in &records {
                info!(
                    "Pod {} on {} bound to {} ({}, mac {})",
                    identity, identity.node_name, record.address, record.subnet, record.mac
                );
            }
        }
        Ok(())
    }

    /// Releases the pod's addresses, then lets the pod go.
    ///
    /// Released records lose their IPInstance; retained ones are rewritten
    /// with the live binding cleared.
    async fn release_pod(&self, pod: &Pod) -> Result<(), ControllerError> {
        let identity = WorkloadIdentity::from_pod(pod, self.allocator.policy());
        let namespace = pod.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
        let name = pod.metadata.name.clone().unwrap_or_default();

        match identity {
            Ok(identity) => {
                let outcome = self.allocator.release(&identity);
                if !outcome.is_empty() {
                    self.delete_records(&outcome.released).await?;
                    self.apply_records(&outcome.retained).await?;
                    self.metrics.record_releases(outcome.released.len());
                    self.metrics.record_retentions(outcome.retained.len());
                    info!(
                        "Pod {}: {} addresses released, {} retained",
                        identity,
                        outcome.released.len(),
                        outcome.retained.len()
                    );
                }
            }
            // never allocated, nothing to give back
            Err(e) => debug!("Pod {}/{} has no address identity: {}", namespace, name, e),
        }

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        pods.patch(
            &name,
            &PatchParams::default(),
            &Patch::Merge(&remove_finalizer_patch(&pod.metadata, POD_FINALIZER)),
        )
        .await?;
        Ok(())
    }
}
