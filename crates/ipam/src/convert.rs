//! Conversions from the declarative Subnet definitions into pool configs.

use crate::error::IpamError;
use crds::{IPVersion, Subnet};
use ipnet::IpNet;
use std::net::IpAddr;

/// Validated description of one subnet pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetConfig {
    /// Subnet name
    pub name: String,
    /// Parent network name
    pub network: String,
    /// Address family
    pub version: IPVersion,
    /// Address range
    pub cidr: IpNet,
    /// Gateway, never handed out
    pub gateway: Option<IpAddr>,
    /// First allocatable address override
    pub start: Option<IpAddr>,
    /// Last allocatable address override
    pub end: Option<IpAddr>,
    /// Excluded and reserved addresses, never handed out
    pub excluded: Vec<IpAddr>,
}

impl SubnetConfig {
    /// Config with no gateway, bounds or exclusions
    pub fn new(name: impl Into<String>, network: impl Into<String>, version: IPVersion, cidr: IpNet) -> Self {
        Self {
            name: name.into(),
            network: network.into(),
            version,
            cidr,
            gateway: None,
            start: None,
            end: None,
            excluded: Vec::new(),
        }
    }

    /// Sets the gateway
    #[must_use]
    pub fn with_gateway(mut self, gateway: IpAddr) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Restricts the allocatable range
    #[must_use]
    pub fn with_bounds(mut self, start: Option<IpAddr>, end: Option<IpAddr>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    /// Adds excluded addresses
    #[must_use]
    pub fn with_excluded(mut self, excluded: impl IntoIterator<Item = IpAddr>) -> Self {
        self.excluded.extend(excluded);
        self
    }

    /// Parses a Subnet resource.
    pub fn from_crd(subnet: &Subnet) -> Result<Self, IpamError> {
        let name = subnet
            .metadata
            .name
            .clone()
            .ok_or_else(|| IpamError::InvalidRecord("subnet without name".to_string()))?;
        let range = &subnet.spec.range;

        let cidr: IpNet = range
            .cidr
            .parse()
            .map_err(|e| IpamError::invalid_subnet(&name, format!("cidr {:?}: {e}", range.cidr)))?;

        let parse = |field: &str, raw: &str| -> Result<IpAddr, IpamError> {
            raw.trim()
                .parse::<IpAddr>()
                .map_err(|e| IpamError::invalid_subnet(&name, format!("{field} {raw:?}: {e}")))
        };

        let gateway = range.gateway.as_deref().map(|g| parse("gateway", g)).transpose()?;
        let start = range.start.as_deref().map(|s| parse("start", s)).transpose()?;
        let end = range.end.as_deref().map(|e| parse("end", e)).transpose()?;
        let excluded = range
            .exclude_ips
            .iter()
            .map(|ip| parse("excludeIPs", ip))
            .chain(range.reserved_ips.iter().map(|ip| parse("reservedIPs", ip)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name,
            network: subnet.spec.network.clone(),
            version: range.version,
            cidr,
            gateway,
            start,
            end,
            excluded,
        })
    }
}

/// Family of an address.
pub fn version_of(ip: IpAddr) -> IPVersion {
    match ip {
        IpAddr::V4(_) => IPVersion::IPv4,
        IpAddr::V6(_) => IPVersion::IPv6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{AddressRange, SubnetSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn subnet(range: AddressRange) -> Subnet {
        Subnet {
            metadata: ObjectMeta {
                name: Some("sub".to_string()),
                ..Default::default()
            },
            spec: SubnetSpec {
                network: "net".to_string(),
                range,
            },
            status: None,
        }
    }

    #[test]
    fn test_from_crd_merges_reserved_into_excluded() {
        let config = SubnetConfig::from_crd(&subnet(AddressRange {
            version: IPVersion::IPv4,
            cidr: "10.1.0.0/24".to_string(),
            gateway: Some("10.1.0.1".to_string()),
            start: Some("10.1.0.10".to_string()),
            end: None,
            exclude_ips: vec!["10.1.0.20".to_string()],
            reserved_ips: vec!["10.1.0.21".to_string()],
        }))
        .unwrap();

        assert_eq!(config.network, "net");
        assert_eq!(config.gateway, Some("10.1.0.1".parse().unwrap()));
        assert_eq!(config.start, Some("10.1.0.10".parse().unwrap()));
        assert_eq!(config.excluded.len(), 2);
    }

    #[test]
    fn test_from_crd_rejects_bad_cidr() {
        let err = SubnetConfig::from_crd(&subnet(AddressRange {
            version: IPVersion::IPv4,
            cidr: "10.1.0.0/33".to_string(),
            ..Default::default()
        }))
        .unwrap_err();
        assert_eq!(err.reason(), "InvalidSubnet");
    }
}
