//! Address retention for stateful workloads.
//!
//! Records of a released stateful pod are parked here under
//! (namespace, owner, ordinal) until a pod with the same identity comes
//! back or the owner scales the ordinal away.

use crate::error::IpamError;
use crate::identity::RetentionKey;
use crate::record::AddressRecord;
use crds::ReferredObject;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Retained address records keyed by stateful identity.
#[derive(Debug, Default)]
pub struct RetentionStore {
    entries: RwLock<HashMap<RetentionKey, Vec<AddressRecord>>>,
}

impl RetentionStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives the key of a retained record from its binding.
    pub fn key_of(record: &AddressRecord) -> Result<RetentionKey, IpamError> {
        let ordinal = record
            .binding
            .stateful
            .as_ref()
            .and_then(|s| s.index)
            .ok_or_else(|| {
                IpamError::inconsistent(
                    format!("{}/{}", record.namespace, record.binding.pod_name),
                    format!("record {} carries no ordinal", record.name),
                )
            })?;
        Ok(RetentionKey {
            namespace: record.namespace.clone(),
            owner: record.binding.referred_object.clone(),
            ordinal,
        })
    }

    /// Parks a record. A record of the same family already stored under the
    /// key is replaced and handed back; its address is the caller's to free.
    pub fn retain(&self, record: AddressRecord) -> Result<(RetentionKey, Option<AddressRecord>), IpamError> {
        let key = Self::key_of(&record)?;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let slot = entries.entry(key.clone()).or_default();
        let displaced = slot
            .iter()
            .position(|r| r.version() == record.version())
            .map(|i| slot.remove(i));
        debug!(key = %key, address = %record.address, "Retaining address");
        slot.push(record);
        slot.sort_by_key(AddressRecord::version);
        Ok((key, displaced))
    }

    /// Records retained under `key`, without removing them.
    pub fn lookup(&self, key: &RetentionKey) -> Option<Vec<AddressRecord>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub(crate) fn take(&self, key: &RetentionKey) -> Option<Vec<AddressRecord>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).remove(key)
    }

    /// Drops the records under `key` and returns them.
    pub fn purge(&self, key: &RetentionKey) -> Vec<AddressRecord> {
        self.take(key).unwrap_or_default()
    }

    /// Keys retained for one owner
    pub fn keys_for_owner(&self, namespace: &str, owner: &ReferredObject) -> Vec<RetentionKey> {
        let mut keys: Vec<RetentionKey> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|k| k.namespace == namespace && k.owner == *owner)
            .cloned()
            .collect();
        keys.sort_by_key(|k| k.ordinal);
        keys
    }

    /// Number of retained identities
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing is retained
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every retained record
    pub fn snapshot(&self) -> Vec<AddressRecord> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .flatten()
            .cloned()
            .collect()
    }

    /// (subnet, address) pairs of every retained record
    pub(crate) fn addresses(&self) -> Vec<(String, IpAddr)> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .flatten()
            .map(|r| (r.subnet.clone(), r.ip()))
            .collect()
    }
}
