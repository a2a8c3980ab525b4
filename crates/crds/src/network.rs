//! Network CRD
//!
//! A logical network that subnets belong to. The network type decides how
//! workload addresses are forwarded: bridged onto the physical segment
//! (underlay) or encapsulated between node tunnel endpoints (overlay).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "networking.netplane.io",
    version = "v1",
    kind = "Network",
    status = "NetworkStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Network type
    #[serde(rename = "type")]
    pub network_type: NetworkType,

    /// Nodes attached to this network (underlay networks only)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
}

/// How workload addresses of a network are forwarded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "PascalCase")]
pub enum NetworkType {
    /// Directly routable on the physical/VLAN segment
    #[default]
    #[serde(alias = "underlay")]
    Underlay,

    /// Tunnel encapsulated between node VTEPs
    #[serde(alias = "overlay")]
    Overlay,
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkType::Underlay => f.write_str("Underlay"),
            NetworkType::Overlay => f.write_str("Overlay"),
        }
    }
}

impl FromStr for NetworkType {
    type Err = crate::ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "underlay" => Ok(NetworkType::Underlay),
            "overlay" => Ok(NetworkType::Overlay),
            _ => Err(crate::ParseEnumError::new("network type", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    /// Number of subnets belonging to the network
    pub subnet_count: u32,

    /// Last reconciliation timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<chrono::DateTime<chrono::Utc>>,
}
