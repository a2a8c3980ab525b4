//! Subnet CRD
//!
//! An address range belonging to a network, from which workload addresses
//! are allocated.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "networking.netplane.io",
    version = "v1",
    kind = "Subnet",
    status = "SubnetStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    /// Name of the parent Network
    pub network: String,

    /// Address range of the subnet
    pub range: AddressRange,
}

/// Allocatable address range.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AddressRange {
    /// Address family
    pub version: IPVersion,

    /// CIDR (e.g., "10.0.0.0/24")
    pub cidr: String,

    /// Gateway address, never handed out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    /// First allocatable address (defaults to the first host address)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,

    /// Last allocatable address (defaults to the last host address)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,

    /// Addresses never handed out
    #[serde(default, rename = "excludeIPs", skip_serializing_if = "Vec::is_empty")]
    pub exclude_ips: Vec<String>,

    /// Addresses reserved for explicit assignment, never handed out by the allocator
    #[serde(default, rename = "reservedIPs", skip_serializing_if = "Vec::is_empty")]
    pub reserved_ips: Vec<String>,
}

/// Address family of a single address.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum IPVersion {
    /// IPv4
    #[default]
    #[serde(rename = "IPv4", alias = "4")]
    IPv4,

    /// IPv6
    #[serde(rename = "IPv6", alias = "6")]
    IPv6,
}

impl fmt::Display for IPVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IPVersion::IPv4 => f.write_str("IPv4"),
            IPVersion::IPv6 => f.write_str("IPv6"),
        }
    }
}

/// Address families requested by a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IPFamilyMode {
    /// One IPv4 address
    #[default]
    IPv4,
    /// One IPv6 address
    IPv6,
    /// One IPv4 and one IPv6 address sharing a MAC
    DualStack,
}

impl IPFamilyMode {
    /// Families to allocate, IPv4 first
    pub fn versions(self) -> &'static [IPVersion] {
        match self {
            IPFamilyMode::IPv4 => &[IPVersion::IPv4],
            IPFamilyMode::IPv6 => &[IPVersion::IPv6],
            IPFamilyMode::DualStack => &[IPVersion::IPv4, IPVersion::IPv6],
        }
    }
}

impl fmt::Display for IPFamilyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IPFamilyMode::IPv4 => f.write_str("IPv4"),
            IPFamilyMode::IPv6 => f.write_str("IPv6"),
            IPFamilyMode::DualStack => f.write_str("DualStack"),
        }
    }
}

impl FromStr for IPFamilyMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ipv4" | "4" => Ok(IPFamilyMode::IPv4),
            "ipv6" | "6" => Ok(IPFamilyMode::IPv6),
            "dualstack" => Ok(IPFamilyMode::DualStack),
            _ => Err(ParseEnumError::new("ip family", s)),
        }
    }
}

/// Unrecognised enum value in an annotation or environment variable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {what}: {value:?}")]
pub struct ParseEnumError {
    what: &'static str,
    value: String,
}

impl ParseEnumError {
    pub(crate) fn new(what: &'static str, value: &str) -> Self {
        Self {
            what,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubnetStatus {
    /// Allocatable addresses in the range
    pub total: u64,

    /// Addresses held by active or retained records
    pub used: u64,

    /// Addresses still free
    pub available: u64,

    /// Last reconciliation timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<chrono::DateTime<chrono::Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NetworkType;

    #[test]
    fn test_family_mode_parsing() {
        assert_eq!("IPv4".parse::<IPFamilyMode>(), Ok(IPFamilyMode::IPv4));
        assert_eq!("ipv6".parse::<IPFamilyMode>(), Ok(IPFamilyMode::IPv6));
        assert_eq!("DualStack".parse::<IPFamilyMode>(), Ok(IPFamilyMode::DualStack));
        assert!("both".parse::<IPFamilyMode>().is_err());
        assert_eq!(IPFamilyMode::DualStack.versions(), &[IPVersion::IPv4, IPVersion::IPv6]);
    }

    #[test]
    fn test_network_type_parsing() {
        assert_eq!("Overlay".parse::<NetworkType>(), Ok(NetworkType::Overlay));
        assert_eq!("underlay".parse::<NetworkType>(), Ok(NetworkType::Underlay));
        assert!("vlan".parse::<NetworkType>().is_err());
    }

    #[test]
    fn test_range_serializes_ip_lists_with_upper_case_names() {
        let range = AddressRange {
            version: IPVersion::IPv4,
            cidr: "10.0.0.0/24".to_string(),
            exclude_ips: vec!["10.0.0.9".to_string()],
            ..Default::default()
        };
        let json = serde_json::to_value(&range).unwrap();
        assert_eq!(json["excludeIPs"][0], "10.0.0.9");
        assert_eq!(json["version"], "IPv4");
        assert!(json.get("reservedIPs").is_none());
    }
}
