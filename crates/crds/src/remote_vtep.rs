//! RemoteVtep CRD
//!
//! Tunnel endpoint of a node in a peer cluster, mirrored into the local
//! cluster so overlay traffic can be forwarded across cluster boundaries.

use crate::constants::{ANNOTATION_NODE_LOCAL_VXLAN_IP_LIST, split_ip_list};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "networking.netplane.io",
    version = "v1",
    kind = "RemoteVtep"
)]
#[serde(rename_all = "camelCase")]
pub struct RemoteVtepSpec {
    /// Peer cluster the node belongs to
    pub cluster_name: String,

    /// Node name inside the peer cluster
    pub node_name: String,

    /// Tunnel endpoint of the node
    pub vtep_info: VtepInfo,

    /// Ordered endpoint addresses served behind the VTEP
    #[serde(default, rename = "endpointIPList", skip_serializing_if = "Vec::is_empty")]
    pub endpoint_ip_list: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VtepInfo {
    /// Tunnel endpoint address
    pub ip: String,

    /// Tunnel endpoint hardware address
    pub mac: String,
}

impl RemoteVtep {
    /// Ordered node-local VXLAN addresses carried in the annotation
    pub fn node_local_vxlan_ips(&self) -> Vec<String> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(ANNOTATION_NODE_LOCAL_VXLAN_IP_LIST))
            .map(|raw| split_ip_list(raw))
            .unwrap_or_default()
    }
}
