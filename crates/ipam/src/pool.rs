//! Free/used bookkeeping of a single subnet.
//!
//! Addresses are tracked as integers. Allocation walks a next-free cursor
//! that wraps around the allocatable range, so freed addresses are reused
//! only after the rest of the range has been handed out once.

use crate::convert::{SubnetConfig, version_of};
use crate::error::IpamError;
use crds::{IPVersion, NetworkType};
use ipnet::IpNet;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Counters of a subnet pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolUsage {
    /// Allocatable addresses (range minus exclusions)
    pub total: u128,
    /// Allocatable addresses currently held
    pub used: u128,
    /// Allocatable addresses still free
    pub available: u128,
}

/// Address pool of one subnet. Not synchronised; the allocator wraps each
/// pool in its own lock.
#[derive(Debug)]
pub struct SubnetPool {
    name: String,
    network: String,
    network_type: NetworkType,
    version: IPVersion,
    cidr: IpNet,
    gateway: Option<IpAddr>,
    first: u128,
    last: u128,
    excluded: HashSet<u128>,
    used: HashSet<u128>,
    used_allocatable: u128,
    cursor: u128,
}

fn to_int(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

fn from_int(value: u128, version: IPVersion) -> IpAddr {
    match version {
        #[allow(clippy::cast_possible_truncation, reason = "IPv4 pools only hold 32-bit values")]
        IPVersion::IPv4 => IpAddr::V4(Ipv4Addr::from(value as u32)),
        IPVersion::IPv6 => IpAddr::V6(Ipv6Addr::from(value)),
    }
}

impl SubnetPool {
    /// Builds an empty pool from a validated config.
    pub fn new(config: &SubnetConfig, network_type: NetworkType) -> Result<Self, IpamError> {
        let mut pool = Self {
            name: config.name.clone(),
            network: config.network.clone(),
            network_type,
            version: config.version,
            cidr: config.cidr,
            gateway: None,
            first: 0,
            last: 0,
            excluded: HashSet::new(),
            used: HashSet::new(),
            used_allocatable: 0,
            cursor: 0,
        };
        pool.apply(config)?;
        Ok(pool)
    }

    /// Re-applies a changed definition, keeping every held address.
    ///
    /// Fails without touching the pool if a held address would fall outside
    /// the new CIDR.
    pub fn update(&mut self, config: &SubnetConfig, network_type: NetworkType) -> Result<(), IpamError> {
        if config.version != self.version {
            return Err(IpamError::invalid_subnet(
                &self.name,
                format!("family cannot change from {} to {}", self.version, config.version),
            ));
        }
        if let Some(outside) = self
            .used
            .iter()
            .map(|v| from_int(*v, self.version))
            .find(|ip| !config.cidr.contains(ip))
        {
            return Err(IpamError::invalid_subnet(
                &self.name,
                format!("held address {outside} is outside new cidr {}", config.cidr),
            ));
        }
        self.network_type = network_type;
        self.apply(config)
    }

    fn apply(&mut self, config: &SubnetConfig) -> Result<(), IpamError> {
        let name = &config.name;
        let cidr = config.cidr.trunc();
        if version_of(cidr.network()) != config.version {
            return Err(IpamError::invalid_subnet(
                name,
                format!("cidr {cidr} does not match version {}", config.version),
            ));
        }

        let network = to_int(cidr.network());
        let broadcast = to_int(cidr.broadcast());
        let (mut first, mut last) = match config.version {
            IPVersion::IPv4 if cidr.prefix_len() < 31 => (network + 1, broadcast - 1),
            IPVersion::IPv6 if cidr.prefix_len() < 128 => (network + 1, broadcast),
            _ => (network, broadcast),
        };

        let in_cidr = |field: &str, ip: IpAddr| -> Result<u128, IpamError> {
            if cidr.contains(&ip) {
                Ok(to_int(ip))
            } else {
                Err(IpamError::invalid_subnet(name, format!("{field} {ip} is outside {cidr}")))
            }
        };

        if let Some(start) = config.start {
            first = first.max(in_cidr("start", start)?);
        }
        if let Some(end) = config.end {
            last = last.min(in_cidr("end", end)?);
        }
        if first > last {
            return Err(IpamError::invalid_subnet(name, "allocatable range is empty"));
        }

        let mut excluded = HashSet::new();
        if let Some(gateway) = config.gateway {
            excluded.insert(in_cidr("gateway", gateway)?);
        }
        for ip in &config.excluded {
            excluded.insert(in_cidr("excluded address", *ip)?);
        }
        excluded.retain(|v| (first..=last).contains(v));

        self.network.clone_from(&config.network);
        self.cidr = cidr;
        self.gateway = config.gateway;
        self.first = first;
        self.last = last;
        self.excluded = excluded;
        if !(first..=last).contains(&self.cursor) {
            self.cursor = first;
        }
        self.used_allocatable = self.used.iter().filter(|v| self.is_allocatable(**v)).count() as u128;
        Ok(())
    }

    fn is_allocatable(&self, value: u128) -> bool {
        (self.first..=self.last).contains(&value) && !self.excluded.contains(&value)
    }

    /// Subnet name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent network name
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Type of the parent network
    pub fn network_type(&self) -> NetworkType {
        self.network_type
    }

    pub(crate) fn set_network_type(&mut self, network_type: NetworkType) {
        self.network_type = network_type;
    }

    /// Address family
    pub fn version(&self) -> IPVersion {
        self.version
    }

    /// Subnet range
    pub fn cidr(&self) -> IpNet {
        self.cidr
    }

    /// Gateway of the subnet
    pub fn gateway(&self) -> Option<IpAddr> {
        self.gateway
    }

    /// Current counters
    pub fn usage(&self) -> PoolUsage {
        let total = self.last - self.first + 1 - self.excluded.len() as u128;
        PoolUsage {
            total,
            used: self.used_allocatable,
            available: total - self.used_allocatable,
        }
    }

    /// Whether the address is held
    pub fn is_used(&self, ip: IpAddr) -> bool {
        self.cidr.contains(&ip) && self.used.contains(&to_int(ip))
    }

    /// Held addresses, including held addresses that are now excluded
    pub fn used_addresses(&self) -> Vec<IpAddr> {
        self.used.iter().map(|v| from_int(*v, self.version)).collect()
    }

    /// Hands out the next free address after the cursor, or `None` when the
    /// pool is exhausted.
    pub fn allocate_next(&mut self) -> Option<IpAddr> {
        if self.usage().available == 0 {
            return None;
        }

        let span = self.last - self.first + 1;
        let offset = self.cursor - self.first;
        for step in 0..span {
            let candidate = self.first + (offset + step) % span;
            if self.excluded.contains(&candidate) || self.used.contains(&candidate) {
                continue;
            }
            self.used.insert(candidate);
            self.used_allocatable += 1;
            self.cursor = if candidate == self.last { self.first } else { candidate + 1 };
            return Some(from_int(candidate, self.version));
        }
        None
    }

    /// Marks an address held by a persisted record. Excluded addresses are
    /// accepted, since exclusions may have been added after the record was
    /// written. Returns `false` if the address was already held.
    pub fn mark_used(&mut self, ip: IpAddr) -> Result<bool, IpamError> {
        let value = self.check_range(ip)?;
        if !self.used.insert(value) {
            return Ok(false);
        }
        if self.is_allocatable(value) {
            self.used_allocatable += 1;
        }
        Ok(true)
    }

    /// Returns an address to the pool. Returns `false` if it was not held.
    pub fn release(&mut self, ip: IpAddr) -> bool {
        if !self.cidr.contains(&ip) {
            return false;
        }
        let value = to_int(ip);
        if !self.used.remove(&value) {
            return false;
        }
        if self.is_allocatable(value) {
            self.used_allocatable -= 1;
        }
        true
    }

    fn check_range(&self, ip: IpAddr) -> Result<u128, IpamError> {
        if self.cidr.contains(&ip) {
            Ok(to_int(ip))
        } else {
            Err(IpamError::AddressOutOfRange {
                subnet: self.name.clone(),
                address: ip,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(cidr: &str) -> SubnetPool {
        let net: IpNet = cidr.parse().unwrap();
        let version = version_of(net.addr());
        SubnetPool::new(&SubnetConfig::new("sub", "net", version, net), NetworkType::Underlay).unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_ipv4_skips_network_and_broadcast() {
        let mut p = pool("10.0.0.0/30");
        assert_eq!(p.usage().total, 2);
        assert_eq!(p.allocate_next(), Some(ip("10.0.0.1")));
        assert_eq!(p.allocate_next(), Some(ip("10.0.0.2")));
        assert_eq!(p.allocate_next(), None);
    }

    #[test]
    fn test_gateway_and_exclusions_are_never_handed_out() {
        let net: IpNet = "10.0.0.0/29".parse().unwrap();
        let config = SubnetConfig::new("sub", "net", IPVersion::IPv4, net)
            .with_gateway(ip("10.0.0.1"))
            .with_excluded([ip("10.0.0.3"), ip("10.0.0.5")]);
        let mut p = SubnetPool::new(&config, NetworkType::Underlay).unwrap();

        assert_eq!(p.usage().total, 3);
        let mut got = Vec::new();
        while let Some(addr) = p.allocate_next() {
            got.push(addr);
        }
        assert_eq!(got, vec![ip("10.0.0.2"), ip("10.0.0.4"), ip("10.0.0.6")]);
        assert_eq!(p.usage().available, 0);
    }

    #[test]
    fn test_cursor_wraps_and_reuses_freed_addresses_last() {
        let mut p = pool("10.0.0.0/29");
        let first = p.allocate_next().unwrap();
        let second = p.allocate_next().unwrap();
        assert!(p.release(first));
        assert_ne!(p.allocate_next(), Some(first));
        assert!(p.is_used(second));

        while p.allocate_next().is_some() {}
        assert!(p.release(second));
        assert_eq!(p.allocate_next(), Some(second));
    }

    #[test]
    fn test_bounds_restrict_range() {
        let net: IpNet = "10.0.0.0/24".parse().unwrap();
        let config = SubnetConfig::new("sub", "net", IPVersion::IPv4, net)
            .with_bounds(Some(ip("10.0.0.100")), Some(ip("10.0.0.101")));
        let mut p = SubnetPool::new(&config, NetworkType::Underlay).unwrap();
        assert_eq!(p.allocate_next(), Some(ip("10.0.0.100")));
        assert_eq!(p.allocate_next(), Some(ip("10.0.0.101")));
        assert_eq!(p.allocate_next(), None);
    }

    #[test]
    fn test_invalid_definitions() {
        let net: IpNet = "10.0.0.0/24".parse().unwrap();
        let outside = SubnetConfig::new("sub", "net", IPVersion::IPv4, net).with_gateway(ip("10.0.1.1"));
        assert!(SubnetPool::new(&outside, NetworkType::Underlay).is_err());

        let empty = SubnetConfig::new("sub", "net", IPVersion::IPv4, net)
            .with_bounds(Some(ip("10.0.0.9")), Some(ip("10.0.0.8")));
        assert!(SubnetPool::new(&empty, NetworkType::Underlay).is_err());

        let wrong_family = SubnetConfig::new("sub", "net", IPVersion::IPv6, net);
        assert!(SubnetPool::new(&wrong_family, NetworkType::Underlay).is_err());
    }

    #[test]
    fn test_ipv6_pool() {
        let mut p = pool("fd00::/120");
        assert_eq!(p.usage().total, 255);
        assert_eq!(p.allocate_next(), Some(ip("fd00::1")));
        assert_eq!(p.mark_used(ip("fd00::ff")), Ok(true));
        assert_eq!(p.mark_used(ip("fd00::ff")), Ok(false));
        assert!(matches!(
            p.mark_used(ip("fd01::1")),
            Err(IpamError::AddressOutOfRange { .. })
        ));
    }

    #[test]
    fn test_mark_used_accepts_excluded_addresses() {
        let net: IpNet = "10.0.0.0/29".parse().unwrap();
        let config = SubnetConfig::new("sub", "net", IPVersion::IPv4, net).with_excluded([ip("10.0.0.2")]);
        let mut p = SubnetPool::new(&config, NetworkType::Underlay).unwrap();

        assert_eq!(p.mark_used(ip("10.0.0.2")), Ok(true));
        assert_eq!(p.mark_used(ip("10.0.0.2")), Ok(false));
        assert_eq!(p.usage().used, 0);
        assert!(p.release(ip("10.0.0.2")));
    }

    #[test]
    fn test_update_keeps_held_addresses() {
        let mut p = pool("10.0.0.0/24");
        let held = p.allocate_next().unwrap();

        let grown: IpNet = "10.0.0.0/23".parse().unwrap();
        p.update(&SubnetConfig::new("sub", "net", IPVersion::IPv4, grown), NetworkType::Overlay)
            .unwrap();
        assert!(p.is_used(held));
        assert_eq!(p.network_type(), NetworkType::Overlay);

        let moved: IpNet = "10.9.0.0/24".parse().unwrap();
        assert!(p
            .update(&SubnetConfig::new("sub", "net", IPVersion::IPv4, moved), NetworkType::Overlay)
            .is_err());
        assert!(p.is_used(held));
    }
}
