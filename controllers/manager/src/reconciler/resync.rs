//! Periodic consistency pass between persisted records and allocator state.

use super::Reconciler;
use crate::error::ControllerError;
use crate::reconcile_helpers::records_from_instances;
use ipam::{AddressRecord, LeaseKey};
use kube::api::ListParams;
use std::collections::HashSet;
use tracing::{debug, info, warn};

impl Reconciler {
    /// Runs one resync pass.
    ///
    /// IPInstances that no lease or retained record accounts for are deleted,
    /// persisted addresses missing from the pools are marked used, pool
    /// addresses nothing references are returned, and retained addresses of
    /// vanished or shrunk owners are purged.
    pub async fn resync(&self) -> Result<(), ControllerError> {
        debug!("Starting resync pass");
        let instances = self.watched_instances().list(&ListParams::default()).await?.items;
        let records = records_from_instances(&instances);

        let retained: HashSet<String> = self
            .allocator
            .retention()
            .snapshot()
            .into_iter()
            .map(|r| r.name)
            .collect();

        let (live, stale): (Vec<AddressRecord>, Vec<AddressRecord>) = records
            .into_iter()
            .partition(|record| self.is_accounted_for(record, &retained));

        for record in &stale {
            // a subnet that is not loaded yet must not cost its records
            if self.allocator.usage(&record.subnet).is_err() {
                continue;
            }
            if self.is_accounted_for(record, &retained) {
                continue;
            }
            warn!(
                "IPInstance {}/{} ({}) is not held by any workload, deleting it",
                record.namespace, record.name, record.address
            );
            self.delete_instance(&record.namespace, &record.name).await?;
        }

        let report = self.allocator.reconcile_usage(&live);
        self.metrics.record_leaks(report.leaked.len());
        for (subnet, address) in &report.marked {
            info!("Address {} of subnet {} marked used from its IPInstance", address, subnet);
        }

        self.collect_retained_owners().await?;
        debug!("Resync pass finished");
        Ok(())
    }

    fn is_accounted_for(&self, record: &AddressRecord, retained: &HashSet<String>) -> bool {
        if retained.contains(&record.name) {
            return true;
        }
        let key = LeaseKey {
            namespace: record.namespace.clone(),
            pod_name: record.binding.pod_name.clone(),
        };
        self.allocator
            .lease(&key)
            .is_some_and(|held| held.iter().any(|r| r.name == record.name))
    }
}
