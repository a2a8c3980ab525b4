//! Well-known labels, annotations and finalizers.

/// Pod annotation selecting the network type ("Underlay" or "Overlay").
pub const ANNOTATION_NETWORK_TYPE: &str = "networking.netplane.io/network-type";

/// Pod annotation selecting the address family ("IPv4", "IPv6" or "DualStack").
pub const ANNOTATION_IP_FAMILY: &str = "networking.netplane.io/ip-family";

/// Pod annotation pinning allocation to one named network.
pub const ANNOTATION_SPECIFIED_NETWORK: &str = "networking.netplane.io/specified-network";

/// RemoteVtep annotation carrying the comma separated, ordered list of
/// node-local VXLAN addresses of the remote node.
pub const ANNOTATION_NODE_LOCAL_VXLAN_IP_LIST: &str =
    "networking.netplane.io/node-local-vxlan-ip-list";

/// IPInstance label holding the bound pod name.
pub const LABEL_POD: &str = "networking.netplane.io/pod";

/// IPInstance label holding the bound node name (empty while retained).
pub const LABEL_NODE: &str = "networking.netplane.io/node";

/// IPInstance label holding the owning subnet.
pub const LABEL_SUBNET: &str = "networking.netplane.io/subnet";

/// IPInstance label holding the owning network.
pub const LABEL_NETWORK: &str = "networking.netplane.io/network";

/// Finalizer placed on pods whose addresses are managed by netplane.
pub const POD_FINALIZER: &str = "networking.netplane.io/ip-release";

/// Finalizer keeping a network until its subnets are gone.
pub const NETWORK_FINALIZER: &str = "networking.netplane.io/network-cleanup";

/// Finalizer keeping a subnet until none of its addresses is in use.
pub const SUBNET_FINALIZER: &str = "networking.netplane.io/subnet-cleanup";

/// Field manager used for server-side apply.
pub const FIELD_MANAGER: &str = "netplane";

/// Splits the node-local VXLAN annotation into its ordered entries.
///
/// Whitespace around entries is trimmed and empty entries are dropped, but
/// the order of the remaining entries is preserved.
pub fn split_ip_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_ip_list_keeps_order() {
        assert_eq!(
            split_ip_list("10.0.0.2, 10.0.0.1,,"),
            vec!["10.0.0.2".to_string(), "10.0.0.1".to_string()]
        );
        assert!(split_ip_list("").is_empty());
    }
}
