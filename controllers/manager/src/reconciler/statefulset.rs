//! Cleanup of retained addresses when stateful owners shrink or go away.

use super::Reconciler;
use crate::error::ControllerError;
use crds::ReferredObject;
use ipam::AddressRecord;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::Api;
use kube_runtime::controller::Action;
use tracing::info;

const STATEFUL_SET: &str = "StatefulSet";

impl Reconciler {
    /// Drops retained addresses of ordinals the StatefulSet no longer runs.
    pub async fn reconcile_statefulset(&self, sts: &StatefulSet) -> Result<Action, ControllerError> {
        let (Some(namespace), Some(name)) = (sts.metadata.namespace.as_deref(), sts.metadata.name.as_deref()) else {
            return Ok(Action::await_change());
        };
        let owner = ReferredObject::new(
            STATEFUL_SET,
            name,
            sts.metadata.uid.clone().unwrap_or_default(),
        );
        let replicas = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);

        let purged = self.allocator.purge_ordinals_from(namespace, &owner, replicas);
        self.finish_purge(namespace, name, &purged).await?;
        Ok(Action::await_change())
    }

    /// Checks every owner holding retained addresses against the cluster:
    /// deleted or recreated StatefulSets lose all of them, shrunk ones lose
    /// the ordinals beyond their replica count.
    pub(crate) async fn collect_retained_owners(&self) -> Result<(), ControllerError> {
        for (namespace, owner) in self.allocator.retained_owners() {
            if owner.kind != STATEFUL_SET {
                continue;
            }
            let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), &namespace);
            let purged = match api.get_opt(&owner.name).await? {
                Some(sts) if sts.metadata.uid.as_deref() == Some(owner.uid.as_str()) => {
                    let replicas = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                    self.allocator.purge_ordinals_from(&namespace, &owner, replicas)
                }
                _ => self.allocator.purge_owner(&namespace, &owner),
            };
            self.finish_purge(&namespace, &owner.name, &purged).await?;
        }
        Ok(())
    }

    async fn finish_purge(&self, namespace: &str, owner: &str, purged: &[AddressRecord]) -> Result<(), ControllerError> {
        if purged.is_empty() {
            return Ok(());
        }
        self.delete_records(purged).await?;
        self.metrics.record_purges(purged.len());
        info!(
            "StatefulSet {}/{}: purged {} retained addresses",
            namespace,
            owner,
            purged.len()
        );
        Ok(())
    }
}
