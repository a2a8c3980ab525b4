//! In-memory form of an allocated address and its IPInstance conversions.

use crate::convert::version_of;
use crate::error::IpamError;
use crds::{
    Binding, IPInstance, IPInstanceSpec, IPVersion, InstanceAddress, LABEL_NETWORK, LABEL_NODE, LABEL_POD,
    LABEL_SUBNET,
};
use ipnet::IpNet;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::net::IpAddr;

/// One allocated address and its binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRecord {
    /// Record name, stable across rebinds
    pub name: String,
    /// Namespace of the workload
    pub namespace: String,
    /// Address with the subnet prefix length
    pub address: IpNet,
    /// Gateway of the subnet
    pub gateway: Option<IpAddr>,
    /// Hardware address, shared by all records of one allocation
    pub mac: String,
    /// Subnet the address belongs to
    pub subnet: String,
    /// Network the address belongs to
    pub network: String,
    /// Current holder
    pub binding: Binding,
}

impl AddressRecord {
    /// Record name for a pod address: `<pod>-<address with '.' and ':' as '-'>`.
    pub fn record_name(pod_name: &str, ip: IpAddr) -> String {
        let address: String = ip
            .to_string()
            .chars()
            .map(|c| if c == '.' || c == ':' { '-' } else { c })
            .collect();
        format!("{pod_name}-{address}")
    }

    /// The bare address
    pub fn ip(&self) -> IpAddr {
        self.address.addr()
    }

    /// Address family
    pub fn version(&self) -> IPVersion {
        version_of(self.address.addr())
    }

    /// Whether the record is kept for a stateful workload with no live pod
    pub fn is_retained(&self) -> bool {
        self.binding.is_retained()
    }

    /// Clears the live part of the binding, keeping the pod name, owner and
    /// ordinal.
    pub(crate) fn clear_binding(&mut self) {
        self.binding.pod_uid.clear();
        self.binding.node_name.clear();
    }

    /// Labels put on the persisted record
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::from([
            (LABEL_POD.to_string(), self.binding.pod_name.clone()),
            (LABEL_SUBNET.to_string(), self.subnet.clone()),
            (LABEL_NETWORK.to_string(), self.network.clone()),
        ]);
        if !self.binding.node_name.is_empty() {
            labels.insert(LABEL_NODE.to_string(), self.binding.node_name.clone());
        }
        labels
    }

    /// Persisted form of the record.
    pub fn to_instance(&self) -> IPInstance {
        IPInstance {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(self.labels()),
                ..Default::default()
            },
            spec: IPInstanceSpec {
                address: InstanceAddress {
                    ip: self.address.to_string(),
                    gateway: self.gateway.map(|g| g.to_string()),
                    mac: self.mac.clone(),
                    version: self.version(),
                },
                network: self.network.clone(),
                subnet: self.subnet.clone(),
                binding: self.binding.clone(),
            },
            status: None,
        }
    }
}

impl TryFrom<&IPInstance> for AddressRecord {
    type Error = IpamError;

    fn try_from(instance: &IPInstance) -> Result<Self, Self::Error> {
        let name = instance
            .metadata
            .name
            .clone()
            .ok_or_else(|| IpamError::InvalidRecord("instance without name".to_string()))?;
        let namespace = instance.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
        let spec = &instance.spec;

        let address = parse_address(&spec.address.ip)
            .ok_or_else(|| IpamError::InvalidRecord(format!("{name}: bad address {:?}", spec.address.ip)))?;
        if version_of(address.addr()) != spec.address.version {
            return Err(IpamError::InvalidRecord(format!(
                "{name}: address {address} is not {}",
                spec.address.version
            )));
        }
        let gateway = spec
            .address
            .gateway
            .as_deref()
            .map(|g| {
                g.parse::<IpAddr>()
                    .map_err(|e| IpamError::InvalidRecord(format!("{name}: bad gateway {g:?}: {e}")))
            })
            .transpose()?;

        Ok(Self {
            name,
            namespace,
            address,
            gateway,
            mac: spec.address.mac.clone(),
            subnet: spec.subnet.clone(),
            network: spec.network.clone(),
            binding: spec.binding.clone(),
        })
    }
}

/// Accepts CIDR notation, or a bare address as a host route.
fn parse_address(raw: &str) -> Option<IpNet> {
    raw.parse::<IpNet>()
        .ok()
        .or_else(|| raw.parse::<IpAddr>().ok().map(IpNet::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{ReferredObject, StatefulInfo};

    fn record() -> AddressRecord {
        AddressRecord {
            name: AddressRecord::record_name("web-2", "fd00::5".parse().unwrap()),
            namespace: "ns".to_string(),
            address: "fd00::5/64".parse().unwrap(),
            gateway: Some("fd00::1".parse().unwrap()),
            mac: "02:00:00:00:00:01".to_string(),
            subnet: "overlay-v6".to_string(),
            network: "overlay".to_string(),
            binding: Binding {
                pod_uid: "uid".to_string(),
                pod_name: "web-2".to_string(),
                node_name: "node1".to_string(),
                referred_object: ReferredObject::new("StatefulSet", "web", "sts"),
                stateful: Some(StatefulInfo { index: Some(2) }),
            },
        }
    }

    #[test]
    fn test_record_name() {
        assert_eq!(AddressRecord::record_name("pod", "10.0.0.5".parse().unwrap()), "pod-10-0-0-5");
        assert_eq!(AddressRecord::record_name("web-2", "fd00::5".parse().unwrap()), "web-2-fd00--5");
    }

    #[test]
    fn test_instance_conversion_keeps_binding_and_prefix() {
        let original = record();
        let instance = original.to_instance();
        assert_eq!(instance.spec.address.ip, "fd00::5/64");
        assert_eq!(instance.spec.address.version, IPVersion::IPv6);
        let labels = instance.metadata.labels.clone().unwrap();
        assert_eq!(labels[LABEL_NODE], "node1");

        let parsed = AddressRecord::try_from(&instance).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_clear_binding_keeps_identity() {
        let mut r = record();
        r.clear_binding();
        assert!(r.is_retained());
        assert_eq!(r.binding.pod_name, "web-2");
        assert!(!r.labels().contains_key(LABEL_NODE));
    }

    #[test]
    fn test_rejects_family_mismatch() {
        let mut instance = record().to_instance();
        instance.spec.address.version = IPVersion::IPv4;
        assert!(matches!(
            AddressRecord::try_from(&instance),
            Err(IpamError::InvalidRecord(_))
        ));
    }
}
