//! The address allocator.
//!
//! One allocator is created per process and shared behind an `Arc`. Each
//! subnet pool has its own mutex; the subnet map is behind an `RwLock` that
//! is held only to look up or insert pool handles, so allocations against
//! different subnets never wait on each other.
//!
//! Locks are always taken in the order leases, then pool.

use crate::convert::SubnetConfig;
use crate::error::IpamError;
use crate::identity::{LeaseKey, RetentionKey, RetentionPolicy, WorkloadIdentity};
use crate::mac::generate_mac;
use crate::pool::{PoolUsage, SubnetPool};
use crate::record::AddressRecord;
use crate::retention::RetentionStore;
use crds::{IPFamilyMode, IPVersion, NetworkType, ReferredObject};
use ipnet::IpNet;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// What a workload asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Criteria {
    /// Network type to allocate from
    pub network_type: NetworkType,
    /// Families to allocate
    pub families: IPFamilyMode,
    /// Restricts allocation to subnets of one network
    pub network: Option<String>,
}

impl Criteria {
    /// Criteria without a network restriction
    pub fn new(network_type: NetworkType, families: IPFamilyMode) -> Self {
        Self {
            network_type,
            families,
            network: None,
        }
    }

    /// Restricts allocation to one network
    #[must_use]
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }
}

/// Result of releasing a workload's addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseOutcome {
    /// Records whose addresses went back to the pool
    pub released: Vec<AddressRecord>,
    /// Records parked in the retention store, bindings already cleared
    pub retained: Vec<AddressRecord>,
}

impl ReleaseOutcome {
    /// Whether nothing was held
    pub fn is_empty(&self) -> bool {
        self.released.is_empty() && self.retained.is_empty()
    }
}

/// Result of rebuilding state from persisted records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Records restored as active leases
    pub active: usize,
    /// Records restored into the retention store
    pub retained: usize,
    /// Names of records whose address was already claimed by an earlier record
    pub conflicts: Vec<String>,
    /// Names of records whose subnet is unknown or does not contain the address
    pub orphaned: Vec<String>,
}

/// Result of one usage reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageReport {
    /// Persisted addresses that were free in memory and are now marked used
    pub marked: Vec<(String, IpAddr)>,
    /// Addresses that nobody references and that were returned to their pool
    pub leaked: Vec<(String, IpAddr)>,
}

type PoolHandle = Arc<Mutex<SubnetPool>>;

fn lock(pool: &PoolHandle) -> MutexGuard<'_, SubnetPool> {
    pool.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Hands out addresses from subnet pools and keeps stateful addresses
/// across pod recreation.
#[derive(Debug)]
pub struct AddressAllocator {
    policy: RetentionPolicy,
    networks: RwLock<HashMap<String, NetworkType>>,
    pools: RwLock<BTreeMap<String, PoolHandle>>,
    leases: RwLock<HashMap<LeaseKey, Vec<AddressRecord>>>,
    retention: RetentionStore,
    // unreferenced addresses seen by the previous usage pass
    suspects: Mutex<HashSet<(String, IpAddr)>>,
}

impl AddressAllocator {
    /// Empty allocator
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            policy,
            networks: RwLock::new(HashMap::new()),
            pools: RwLock::new(BTreeMap::new()),
            leases: RwLock::new(HashMap::new()),
            retention: RetentionStore::new(),
            suspects: Mutex::new(HashSet::new()),
        }
    }

    /// Retention policy identities are built with
    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Retained records
    pub fn retention(&self) -> &RetentionStore {
        &self.retention
    }

    /// Registers a network or changes its type. Pools of the network follow
    /// the new type.
    pub fn upsert_network(&self, name: &str, network_type: NetworkType) {
        let previous = self
            .networks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), network_type);
        if previous == Some(network_type) {
            return;
        }

        for pool in self.pool_handles() {
            let mut pool = lock(&pool);
            if pool.network() == name {
                pool.set_network_type(network_type);
            }
        }
        info!(network = %name, network_type = %network_type, "Network registered");
    }

    /// Forgets a network. Its subnets stay until removed, but are no longer
    /// eligible since their network is unknown.
    pub fn remove_network(&self, name: &str) -> bool {
        self.networks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    /// Type of a registered network
    pub fn network_type(&self, name: &str) -> Option<NetworkType> {
        self.networks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
    }

    /// Creates or updates a subnet pool. Updates keep every held address.
    pub fn upsert_subnet(&self, config: SubnetConfig) -> Result<PoolUsage, IpamError> {
        let network_type = self
            .network_type(&config.network)
            .ok_or_else(|| IpamError::UnknownNetwork(config.network.clone()))?;

        let mut pools = self.pools.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = pools.get(&config.name) {
            let mut pool = lock(existing);
            pool.update(&config, network_type)?;
            debug!(subnet = %config.name, cidr = %config.cidr, "Subnet updated");
            return Ok(pool.usage());
        }

        let pool = SubnetPool::new(&config, network_type)?;
        let usage = pool.usage();
        pools.insert(config.name.clone(), Arc::new(Mutex::new(pool)));
        info!(
            subnet = %config.name,
            network = %config.network,
            cidr = %config.cidr,
            total = usage.total,
            "Subnet registered"
        );
        Ok(usage)
    }

    /// Removes a pool, refused while it holds addresses.
    pub fn remove_subnet(&self, name: &str) -> Result<(), IpamError> {
        let mut pools = self.pools.write().unwrap_or_else(PoisonError::into_inner);
        let pool = pools
            .get(name)
            .ok_or_else(|| IpamError::UnknownSubnet(name.to_string()))?;
        let held = lock(pool).used_addresses().len() as u128;
        if held > 0 {
            return Err(IpamError::SubnetInUse {
                subnet: name.to_string(),
                used: held,
            });
        }
        pools.remove(name);
        info!(subnet = %name, "Subnet removed");
        Ok(())
    }

    /// Counters of one subnet
    pub fn usage(&self, subnet: &str) -> Result<PoolUsage, IpamError> {
        let pool = self.pool(subnet).ok_or_else(|| IpamError::UnknownSubnet(subnet.to_string()))?;
        Ok(lock(&pool).usage())
    }

    /// Names of the subnets belonging to `network`
    pub fn subnets_of(&self, network: &str) -> Vec<String> {
        self.pool_handles()
            .iter()
            .filter_map(|pool| {
                let pool = lock(pool);
                (pool.network() == network).then(|| pool.name().to_string())
            })
            .collect()
    }

    /// Active records of a pod
    pub fn lease(&self, key: &LeaseKey) -> Option<Vec<AddressRecord>> {
        self.leases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Allocates one address per requested family.
    ///
    /// `eligible` restricts the candidate subnets by name; `None` means every
    /// subnet. Returns the workload's current records when it already holds
    /// addresses under the same pod UID, and the retained records when a
    /// stateful identity comes back.
    pub fn allocate(
        &self,
        identity: &WorkloadIdentity,
        criteria: &Criteria,
        eligible: Option<&[String]>,
    ) -> Result<Vec<AddressRecord>, IpamError> {
        let key = identity.lease_key();
        if let Some(records) = self.lease(&key) {
            if records.iter().all(|r| r.binding.pod_uid == identity.pod_uid) {
                debug!(workload = %identity, "Workload already holds addresses");
                return Ok(records);
            }
        }
        // callers that persist records take the outcome via release_previous first
        self.release_previous(identity);

        let (records, rebound) = match self.rebind(identity, criteria)? {
            Some(records) => (records, true),
            None => (self.allocate_fresh(identity, criteria, eligible)?, false),
        };

        let mut leases = self.leases.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = leases.get(&key) {
            let existing = existing.clone();
            drop(leases);
            warn!(workload = %identity, "Concurrent allocation for the same workload, keeping the first");
            if rebound {
                for record in records {
                    self.park(record)?;
                }
            } else {
                self.free_records(&records);
            }
            return Ok(existing);
        }
        leases.insert(key, records.clone());
        drop(leases);

        for record in &records {
            info!(
                workload = %identity,
                address = %record.address,
                subnet = %record.subnet,
                mac = %record.mac,
                rebound,
                "Address allocated"
            );
        }
        Ok(records)
    }

    fn rebind(
        &self,
        identity: &WorkloadIdentity,
        criteria: &Criteria,
    ) -> Result<Option<Vec<AddressRecord>>, IpamError> {
        let Some(key) = identity.retention_key() else {
            return Ok(None);
        };
        let Some(mut records) = self.retention.take(&key) else {
            return Ok(None);
        };

        if let Err(err) = check_retained(identity, &key, criteria, &records) {
            for record in records {
                self.park(record)?;
            }
            return Err(err);
        }

        let binding = identity.binding();
        for record in &mut records {
            record.binding = binding.clone();
        }
        Ok(Some(records))
    }

    fn allocate_fresh(
        &self,
        identity: &WorkloadIdentity,
        criteria: &Criteria,
        eligible: Option<&[String]>,
    ) -> Result<Vec<AddressRecord>, IpamError> {
        let mac = generate_mac();
        let binding = identity.binding();
        let mut records: Vec<AddressRecord> = Vec::with_capacity(criteria.families.versions().len());

        for version in criteria.families.versions() {
            match self.allocate_family(*version, criteria, eligible) {
                Ok((pool, address)) => {
                    records.push(AddressRecord {
                        name: AddressRecord::record_name(&identity.pod_name, address.addr()),
                        namespace: identity.namespace.clone(),
                        address,
                        gateway: pool.gateway,
                        mac: mac.clone(),
                        subnet: pool.subnet,
                        network: pool.network,
                        binding: binding.clone(),
                    });
                }
                Err(err) => {
                    if !records.is_empty() {
                        debug!(workload = %identity, "Rolling back partial allocation");
                        self.free_records(&records);
                    }
                    warn!(workload = %identity, error = %err, "Allocation failed");
                    return Err(err);
                }
            }
        }
        Ok(records)
    }

    fn allocate_family(
        &self,
        version: IPVersion,
        criteria: &Criteria,
        eligible: Option<&[String]>,
    ) -> Result<(PoolOrigin, IpNet), IpamError> {
        let mut matched = false;
        for (name, handle) in self.named_pool_handles() {
            if eligible.is_some_and(|names| !names.contains(&name)) {
                continue;
            }
            let mut pool = lock(&handle);
            if pool.network_type() != criteria.network_type
                || pool.version() != version
                || criteria.network.as_deref().is_some_and(|n| n != pool.network())
                || self.network_type(pool.network()).is_none()
            {
                continue;
            }
            matched = true;

            if let Some(ip) = pool.allocate_next() {
                let address = IpNet::new(ip, pool.cidr().prefix_len())
                    .map_err(|e| IpamError::invalid_subnet(&name, e.to_string()))?;
                return Ok((
                    PoolOrigin {
                        subnet: name,
                        network: pool.network().to_string(),
                        gateway: pool.gateway(),
                    },
                    address,
                ));
            }
        }

        if matched {
            Err(IpamError::ExhaustedPool {
                network_type: criteria.network_type,
                version,
            })
        } else {
            Err(IpamError::NoEligibleSubnet {
                network_type: criteria.network_type,
                version,
            })
        }
    }

    /// Releases a workload's addresses: ordinary records go back to their
    /// pools, stateful records are retained with the live binding cleared.
    ///
    /// A release carrying a pod UID other than the lease holder's is ignored,
    /// so a late delete of an old pod cannot free a new pod's addresses.
    pub fn release(&self, identity: &WorkloadIdentity) -> ReleaseOutcome {
        let uid = (!identity.pod_uid.is_empty()).then_some(identity.pod_uid.as_str());
        let outcome = self.release_lease(&identity.lease_key(), uid);
        for record in &outcome.released {
            info!(workload = %identity, address = %record.address, subnet = %record.subnet, "Address released");
        }
        for record in &outcome.retained {
            info!(workload = %identity, address = %record.address, subnet = %record.subnet, "Address retained");
        }
        outcome
    }

    /// Releases what an earlier pod of the same name still holds.
    ///
    /// A pod recreated under its old name carries a new UID; the addresses
    /// of the old incarnation are released or retained as on deletion. The
    /// outcome is empty when the lease already belongs to `identity`.
    pub fn release_previous(&self, identity: &WorkloadIdentity) -> ReleaseOutcome {
        let key = identity.lease_key();
        let superseded = self
            .lease(&key)
            .is_some_and(|records| records.iter().any(|r| r.binding.pod_uid != identity.pod_uid));
        if !superseded {
            return ReleaseOutcome::default();
        }
        let outcome = self.release_lease(&key, None);
        debug!(
            workload = %identity,
            released = outcome.released.len(),
            retained = outcome.retained.len(),
            "Released addresses of previous pod incarnation"
        );
        outcome
    }

    fn release_lease(&self, key: &LeaseKey, uid: Option<&str>) -> ReleaseOutcome {
        let records = {
            let mut leases = self.leases.write().unwrap_or_else(PoisonError::into_inner);
            let holder_matches = leases
                .get(key)
                .is_some_and(|records| uid.is_none_or(|uid| records.iter().all(|r| r.binding.pod_uid == uid)));
            if !holder_matches {
                return ReleaseOutcome::default();
            }
            leases.remove(key).unwrap_or_default()
        };

        let mut outcome = ReleaseOutcome::default();
        for mut record in records {
            if record.binding.stateful.is_some() {
                record.clear_binding();
                match self.park(record.clone()) {
                    Ok(_) => outcome.retained.push(record),
                    Err(err) => {
                        warn!(record = %record.name, error = %err, "Cannot retain record, releasing it");
                        self.free_records(std::slice::from_ref(&record));
                        outcome.released.push(record);
                    }
                }
            } else {
                self.free_records(std::slice::from_ref(&record));
                outcome.released.push(record);
            }
        }
        outcome
    }

    // retains a record, freeing the address of a same-family record it displaces
    fn park(&self, record: AddressRecord) -> Result<RetentionKey, IpamError> {
        let subnet = record.subnet.clone();
        let ip = record.ip();
        let (key, displaced) = self.retention.retain(record)?;
        if let Some(old) = displaced.filter(|old| old.subnet != subnet || old.ip() != ip) {
            warn!(key = %key, address = %old.address, "Displaced retained record, freeing its address");
            self.free_records(std::slice::from_ref(&old));
        }
        Ok(key)
    }

    /// Drops the records retained under `key` and frees their addresses.
    pub fn purge(&self, key: &RetentionKey) -> Vec<AddressRecord> {
        let records = self.retention.purge(key);
        self.free_records(&records);
        for record in &records {
            info!(key = %key, address = %record.address, "Retained address purged");
        }
        records
    }

    /// Purges everything retained for an owner, used when the owner is deleted.
    pub fn purge_owner(&self, namespace: &str, owner: &ReferredObject) -> Vec<AddressRecord> {
        self.retention
            .keys_for_owner(namespace, owner)
            .iter()
            .flat_map(|key| self.purge(key))
            .collect()
    }

    /// Purges ordinals at or above `replicas`, used on scale-down.
    pub fn purge_ordinals_from(&self, namespace: &str, owner: &ReferredObject, replicas: i32) -> Vec<AddressRecord> {
        self.retention
            .keys_for_owner(namespace, owner)
            .iter()
            .filter(|key| key.ordinal >= replicas)
            .flat_map(|key| self.purge(key))
            .collect()
    }

    /// Owners with retained records, as (namespace, owner)
    pub fn retained_owners(&self) -> Vec<(String, ReferredObject)> {
        let mut owners: Vec<(String, ReferredObject)> = Vec::new();
        for record in self.retention.snapshot() {
            let owner = (record.namespace.clone(), record.binding.referred_object.clone());
            if !owners.contains(&owner) {
                owners.push(owner);
            }
        }
        owners
    }

    /// Rebuilds pools, leases and retention from persisted records.
    ///
    /// Records are applied in the given order; a record whose address was
    /// already claimed is reported as a conflict and not applied. When two
    /// records claim the same family of one workload, the later one wins and
    /// the earlier one is reported as a conflict with its address freed.
    pub fn restore(&self, records: Vec<AddressRecord>) -> RestoreReport {
        let mut report = RestoreReport::default();

        for record in records {
            let Some(pool) = self.pool(&record.subnet) else {
                report.orphaned.push(record.name);
                continue;
            };
            let marked = lock(&pool).mark_used(record.ip());
            match marked {
                Ok(true) => {}
                Ok(false) => {
                    warn!(record = %record.name, address = %record.address, "Address claimed by another record");
                    report.conflicts.push(record.name);
                    continue;
                }
                Err(err) => {
                    warn!(record = %record.name, error = %err, "Record does not fit its subnet");
                    report.orphaned.push(record.name);
                    continue;
                }
            }

            if record.is_retained() {
                match self.retention.retain(record.clone()) {
                    Ok((_, None)) => report.retained += 1,
                    Ok((_, Some(old))) => {
                        warn!(record = %old.name, replaced_by = %record.name, "Retained record superseded");
                        self.free_records(std::slice::from_ref(&old));
                        report.conflicts.push(old.name);
                    }
                    Err(err) => {
                        warn!(record = %record.name, error = %err, "Cannot restore retained record");
                        lock(&pool).release(record.ip());
                        report.orphaned.push(record.name);
                    }
                }
            } else {
                let key = LeaseKey {
                    namespace: record.namespace.clone(),
                    pod_name: record.binding.pod_name.clone(),
                };
                let mut leases = self.leases.write().unwrap_or_else(PoisonError::into_inner);
                let lease = leases.entry(key).or_default();
                let superseded = lease
                    .iter()
                    .position(|r| r.version() == record.version())
                    .map(|i| lease.remove(i));
                lease.push(record);
                lease.sort_by_key(AddressRecord::version);
                drop(leases);
                match superseded {
                    Some(old) => {
                        warn!(record = %old.name, "Active record superseded");
                        self.free_records(std::slice::from_ref(&old));
                        report.conflicts.push(old.name);
                    }
                    None => report.active += 1,
                }
            }
        }

        info!(
            active = report.active,
            retained = report.retained,
            conflicts = report.conflicts.len(),
            orphaned = report.orphaned.len(),
            "Allocator state restored"
        );
        report
    }

    /// Reconciles in-memory usage against the persisted record set.
    ///
    /// Persisted addresses missing from memory are marked used. An address
    /// used in memory but referenced by no persisted record, lease or
    /// retained record is freed once it has been unreferenced in two
    /// consecutive passes, so allocations that are not persisted yet are
    /// left alone.
    pub fn reconcile_usage(&self, records: &[AddressRecord]) -> UsageReport {
        let mut report = UsageReport::default();
        let mut referenced: HashSet<(String, IpAddr)> = records.iter().map(|r| (r.subnet.clone(), r.ip())).collect();

        for record in records {
            let Some(pool) = self.pool(&record.subnet) else {
                continue;
            };
            if let Ok(true) = lock(&pool).mark_used(record.ip()) {
                report.marked.push((record.subnet.clone(), record.ip()));
            }
        }

        referenced.extend(
            self.leases
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .flatten()
                .map(|r| (r.subnet.clone(), r.ip())),
        );
        referenced.extend(self.retention.addresses());

        let mut suspects = self.suspects.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = HashSet::new();
        for (name, handle) in self.named_pool_handles() {
            let mut pool = lock(&handle);
            for ip in pool.used_addresses() {
                let entry = (name.clone(), ip);
                if referenced.contains(&entry) {
                    continue;
                }
                if suspects.contains(&entry) {
                    pool.release(ip);
                    warn!(subnet = %name, address = %ip, "Leaked address returned to pool");
                    report.leaked.push(entry);
                } else {
                    next.insert(entry);
                }
            }
        }
        *suspects = next;

        if !report.marked.is_empty() || !report.leaked.is_empty() {
            info!(marked = report.marked.len(), leaked = report.leaked.len(), "Usage reconciled");
        }
        report
    }

    fn pool(&self, name: &str) -> Option<PoolHandle> {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn pool_handles(&self) -> Vec<PoolHandle> {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    // name order is the subnet tie-break
    fn named_pool_handles(&self) -> Vec<(String, PoolHandle)> {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, pool)| (name.clone(), Arc::clone(pool)))
            .collect()
    }

    fn free_records(&self, records: &[AddressRecord]) {
        for record in records {
            match self.pool(&record.subnet) {
                Some(pool) => {
                    lock(&pool).release(record.ip());
                }
                None => warn!(subnet = %record.subnet, address = %record.address, "Subnet gone, nothing to free"),
            }
        }
    }
}

struct PoolOrigin {
    subnet: String,
    network: String,
    gateway: Option<IpAddr>,
}

fn check_retained(
    identity: &WorkloadIdentity,
    key: &RetentionKey,
    criteria: &Criteria,
    records: &[AddressRecord],
) -> Result<(), IpamError> {
    let wanted: Vec<IPVersion> = criteria.families.versions().to_vec();
    let mut held: Vec<IPVersion> = records.iter().map(AddressRecord::version).collect();
    held.sort();
    if held != wanted {
        return Err(IpamError::inconsistent(
            identity.to_string(),
            format!("retained families {held:?} do not match requested {}", criteria.families),
        ));
    }

    for record in records {
        let index = record.binding.stateful.as_ref().and_then(|s| s.index);
        if record.binding.referred_object != key.owner || index != Some(key.ordinal) {
            return Err(IpamError::inconsistent(
                identity.to_string(),
                format!("record {} is bound to another owner or ordinal", record.name),
            ));
        }
    }
    Ok(())
}
