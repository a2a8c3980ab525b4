//! IPInstance CRD
//!
//! The persisted form of one allocated address. A workload holds one
//! IPInstance per address family; stateful workloads keep theirs while the
//! pod is absent, with the transient binding fields cleared.

use crate::references::ReferredObject;
use crate::subnet::IPVersion;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "networking.netplane.io",
    version = "v1",
    kind = "IPInstance",
    namespaced,
    status = "IPInstanceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct IPInstanceSpec {
    /// Allocated address
    pub address: InstanceAddress,

    /// Network the address belongs to
    pub network: String,

    /// Subnet the address was allocated from
    pub subnet: String,

    /// Current workload binding
    pub binding: Binding,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceAddress {
    /// Address in CIDR notation (e.g., "10.0.0.5/24")
    pub ip: String,

    /// Gateway of the subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    /// Hardware address of the workload interface
    pub mac: String,

    /// Address family
    pub version: IPVersion,
}

/// Binding of an address to a workload.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    /// UID of the bound pod (empty while the address is retained)
    #[serde(default, rename = "podUID")]
    pub pod_uid: String,

    /// Name of the bound pod (kept while the address is retained)
    #[serde(default)]
    pub pod_name: String,

    /// Node of the bound pod (empty while the address is retained)
    #[serde(default)]
    pub node_name: String,

    /// Object owning the binding
    pub referred_object: ReferredObject,

    /// Ordinal information for stateful workloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stateful: Option<StatefulInfo>,
}

impl Binding {
    /// Whether the binding has been released by its pod but kept for reuse
    pub fn is_retained(&self) -> bool {
        self.pod_uid.is_empty() && self.node_name.is_empty() && self.stateful.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatefulInfo {
    /// Ordinal of the workload parsed from its name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct IPInstanceStatus {
    /// Activation phase on the node
    pub phase: InstancePhase,

    /// Failure detail when activation failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Timestamp of the last phase change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition: Option<chrono::DateTime<chrono::Utc>>,
}

/// IPInstance activation phase
///
/// Serializes as PascalCase ("Active", "Failed", etc.) but deserializes
/// lowercase values too.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum InstancePhase {
    /// Allocated, not yet validated on the node
    #[default]
    #[serde(alias = "pending")]
    Pending,

    /// Validated and announced on the link
    #[serde(alias = "active")]
    Active,

    /// Link-layer validation failed
    #[serde(alias = "failed")]
    Failed,
}

/// Sorts instances by address family, IPv4 first, then by name.
pub fn sort_ip_instances(instances: &mut [IPInstance]) {
    instances.sort_by(|a, b| {
        a.spec
            .address
            .version
            .cmp(&b.spec.address.version)
            .then_with(|| a.metadata.name.cmp(&b.metadata.name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn instance(name: &str, version: IPVersion) -> IPInstance {
        IPInstance {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: IPInstanceSpec {
                address: InstanceAddress {
                    ip: String::new(),
                    gateway: None,
                    mac: String::new(),
                    version,
                },
                network: "net".to_string(),
                subnet: "sub".to_string(),
                binding: Binding::default(),
            },
            status: None,
        }
    }

    #[test]
    fn test_sort_puts_ipv4_first() {
        let mut list = vec![instance("a", IPVersion::IPv6), instance("b", IPVersion::IPv4)];
        sort_ip_instances(&mut list);
        assert_eq!(list[0].spec.address.version, IPVersion::IPv4);
        assert_eq!(list[1].spec.address.version, IPVersion::IPv6);
    }

    #[test]
    fn test_binding_wire_names() {
        let binding = Binding {
            pod_uid: "uid".to_string(),
            pod_name: "pod-2".to_string(),
            node_name: "node1".to_string(),
            referred_object: ReferredObject::new("StatefulSet", "web", "sts"),
            stateful: Some(StatefulInfo { index: Some(2) }),
        };
        let json = serde_json::to_value(&binding).unwrap();
        assert_eq!(json["podUID"], "uid");
        assert_eq!(json["referredObject"]["kind"], "StatefulSet");
        assert_eq!(json["stateful"]["index"], 2);
        assert!(!binding.is_retained());
    }
}
