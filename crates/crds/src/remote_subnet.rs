//! RemoteSubnet CRD
//!
//! A subnet of a peer cluster, mirrored locally so the forwarding plane knows
//! which remote ranges are reachable through the overlay.

use crate::network::NetworkType;
use crate::subnet::AddressRange;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "networking.netplane.io",
    version = "v1",
    kind = "RemoteSubnet"
)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSubnetSpec {
    /// Peer cluster owning the subnet
    pub cluster_name: String,

    /// Network type of the remote subnet
    #[serde(rename = "type")]
    pub network_type: NetworkType,

    /// Address range of the remote subnet
    pub range: AddressRange,
}
