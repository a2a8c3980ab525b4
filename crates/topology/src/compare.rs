//! Field-by-field change detection for remote topology objects.
//!
//! Only fields the forwarding plane consumes are compared. Lists are
//! compared positionally: a reordered list is a change.

use crds::{AddressRange, RemoteSubnet, RemoteVtep};

/// Positional equality of two address lists.
pub fn ip_list_equal(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y)
}

/// Whether a RemoteVtep update requires a node resync.
///
/// The node-local list is compared after parsing its annotation, so
/// whitespace around the commas is not a change; order still is.
pub fn remote_vtep_changed(old: &RemoteVtep, new: &RemoteVtep) -> bool {
    old.spec.vtep_info.ip != new.spec.vtep_info.ip
        || old.spec.vtep_info.mac != new.spec.vtep_info.mac
        || !ip_list_equal(&old.node_local_vxlan_ips(), &new.node_local_vxlan_ips())
        || !ip_list_equal(&old.spec.endpoint_ip_list, &new.spec.endpoint_ip_list)
}

/// Whether a RemoteSubnet update requires a subnet resync.
pub fn remote_subnet_changed(old: &RemoteSubnet, new: &RemoteSubnet) -> bool {
    old.spec.cluster_name != new.spec.cluster_name
        || old.spec.network_type != new.spec.network_type
        || range_changed(&old.spec.range, &new.spec.range)
}

fn range_changed(old: &AddressRange, new: &AddressRange) -> bool {
    old.version != new.version
        || old.cidr != new.cidr
        || old.gateway != new.gateway
        || old.start != new.start
        || old.end != new.end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{ANNOTATION_NODE_LOCAL_VXLAN_IP_LIST, IPVersion, NetworkType, RemoteSubnetSpec, RemoteVtepSpec, VtepInfo};
    use std::collections::BTreeMap;

    fn vtep(ip: &str, endpoints: &[&str], local: Option<&str>) -> RemoteVtep {
        let mut vtep = RemoteVtep::new(
            "c1.node1",
            RemoteVtepSpec {
                cluster_name: "c1".to_string(),
                node_name: "node1".to_string(),
                vtep_info: VtepInfo {
                    ip: ip.to_string(),
                    mac: "02:00:00:00:00:01".to_string(),
                },
                endpoint_ip_list: endpoints.iter().map(ToString::to_string).collect(),
            },
        );
        if let Some(local) = local {
            vtep.metadata.annotations = Some(BTreeMap::from([(
                ANNOTATION_NODE_LOCAL_VXLAN_IP_LIST.to_string(),
                local.to_string(),
            )]));
        }
        vtep
    }

    #[test]
    fn test_identical_vteps_are_unchanged() {
        let a = vtep("192.168.0.1", &["10.0.0.1", "10.0.0.2"], Some("10.1.0.1,10.1.0.2"));
        let mut b = a.clone();
        b.metadata.resource_version = Some("42".to_string());
        b.metadata.labels = Some(BTreeMap::from([("x".to_string(), "y".to_string())]));
        assert!(!remote_vtep_changed(&a, &b));
    }

    #[test]
    fn test_vtep_field_changes() {
        let base = vtep("192.168.0.1", &["10.0.0.1", "10.0.0.2"], Some("10.1.0.1,10.1.0.2"));

        assert!(remote_vtep_changed(&base, &vtep("192.168.0.9", &["10.0.0.1", "10.0.0.2"], Some("10.1.0.1,10.1.0.2"))));
        assert!(remote_vtep_changed(&base, &vtep("192.168.0.1", &["10.0.0.2", "10.0.0.1"], Some("10.1.0.1,10.1.0.2"))));
        assert!(remote_vtep_changed(&base, &vtep("192.168.0.1", &["10.0.0.1"], Some("10.1.0.1,10.1.0.2"))));
        assert!(remote_vtep_changed(&base, &vtep("192.168.0.1", &["10.0.0.1", "10.0.0.2"], Some("10.1.0.2,10.1.0.1"))));
        assert!(remote_vtep_changed(&base, &vtep("192.168.0.1", &["10.0.0.1", "10.0.0.2"], None)));

        let mut mac = base.clone();
        mac.spec.vtep_info.mac = "02:00:00:00:00:02".to_string();
        assert!(remote_vtep_changed(&base, &mac));
    }

    #[test]
    fn test_annotation_whitespace_is_not_a_change() {
        let a = vtep("192.168.0.1", &[], Some("10.1.0.1,10.1.0.2"));
        let b = vtep("192.168.0.1", &[], Some("10.1.0.1, 10.1.0.2"));
        assert!(!remote_vtep_changed(&a, &b));
    }

    #[test]
    fn test_remote_subnet_changes() {
        let subnet = |cidr: &str, gateway: Option<&str>| {
            RemoteSubnet::new(
                "c1.sub",
                RemoteSubnetSpec {
                    cluster_name: "c1".to_string(),
                    network_type: NetworkType::Overlay,
                    range: AddressRange {
                        version: IPVersion::IPv4,
                        cidr: cidr.to_string(),
                        gateway: gateway.map(ToString::to_string),
                        ..Default::default()
                    },
                },
            )
        };
        let base = subnet("10.9.0.0/24", Some("10.9.0.1"));
        assert!(!remote_subnet_changed(&base, &base.clone()));
        assert!(remote_subnet_changed(&base, &subnet("10.9.1.0/24", Some("10.9.0.1"))));
        assert!(remote_subnet_changed(&base, &subnet("10.9.0.0/24", None)));

        let mut underlay = base.clone();
        underlay.spec.network_type = NetworkType::Underlay;
        assert!(remote_subnet_changed(&base, &underlay));

        // exclusions do not affect forwarding
        let mut excluded = base.clone();
        excluded.spec.range.exclude_ips.push("10.9.0.7".to_string());
        assert!(!remote_subnet_changed(&base, &excluded));
    }
}
