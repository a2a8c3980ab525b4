//! Pure helpers shared by the reconcilers: annotation parsing, finalizer
//! bookkeeping and status patch construction.

use crate::error::ControllerError;
use chrono::Utc;
use crds::{
    ANNOTATION_IP_FAMILY, ANNOTATION_NETWORK_TYPE, ANNOTATION_SPECIFIED_NETWORK, IPFamilyMode, IPInstance,
    InstancePhase, NetworkStatus, NetworkType, SubnetStatus,
};
use ipam::{AddressRecord, Criteria, PoolUsage};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use tracing::warn;

/// `namespace/name` for namespaced objects, `name` otherwise.
pub fn resource_key(meta: &ObjectMeta) -> String {
    let name = meta.name.as_deref().unwrap_or_default();
    match meta.namespace.as_deref() {
        Some(ns) => format!("{}/{}", ns, name),
        None => name.to_string(),
    }
}

pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_deref()
        .is_some_and(|list| list.iter().any(|f| f == finalizer))
}

/// Merge patch setting the finalizer list to the current list plus `finalizer`.
pub fn add_finalizer_patch(meta: &ObjectMeta, finalizer: &str) -> Value {
    let mut finalizers = meta.finalizers.clone().unwrap_or_default();
    if !finalizers.iter().any(|f| f == finalizer) {
        finalizers.push(finalizer.to_string());
    }
    json!({ "metadata": { "finalizers": finalizers } })
}

/// Merge patch setting the finalizer list to the current list minus `finalizer`.
pub fn remove_finalizer_patch(meta: &ObjectMeta, finalizer: &str) -> Value {
    let finalizers: Vec<String> = meta
        .finalizers
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter(|f| f.as_str() != finalizer)
        .cloned()
        .collect();
    json!({ "metadata": { "finalizers": finalizers } })
}

/// What a pod reconciliation has to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodDisposition {
    /// Nothing to do
    Skip(&'static str),
    /// Ensure the pod holds addresses
    Allocate,
    /// Give the pod's addresses back and drop the finalizer
    Release,
}

pub fn pod_disposition(pod: &Pod, finalizer: &str) -> PodDisposition {
    let finalized = has_finalizer(&pod.metadata, finalizer);

    if pod.metadata.deletion_timestamp.is_some() {
        return if finalized {
            PodDisposition::Release
        } else {
            PodDisposition::Skip("terminating")
        };
    }

    let spec = pod.spec.as_ref();
    if spec.and_then(|s| s.host_network).unwrap_or(false) {
        return PodDisposition::Skip("host network");
    }

    let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
    if matches!(phase, Some("Succeeded" | "Failed")) {
        return if finalized {
            PodDisposition::Release
        } else {
            PodDisposition::Skip("completed")
        };
    }

    if spec.and_then(|s| s.node_name.as_deref()).is_none_or(str::is_empty) {
        return PodDisposition::Skip("unscheduled");
    }

    PodDisposition::Allocate
}

fn annotation<'a>(annotations: Option<&'a BTreeMap<String, String>>, key: &str) -> Option<&'a str> {
    annotations
        .and_then(|a| a.get(key))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn parse_annotation<T>(annotations: Option<&BTreeMap<String, String>>, key: &str) -> Result<Option<T>, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    annotation(annotations, key)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| ControllerError::InvalidAnnotation {
                key: key.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

/// Builds allocation criteria from pod annotations.
///
/// A pinned network without an explicit network type takes the type of that
/// network, looked up through `network_type_of`.
pub fn criteria_for_pod<F>(
    annotations: Option<&BTreeMap<String, String>>,
    default_type: NetworkType,
    default_family: IPFamilyMode,
    network_type_of: F,
) -> Result<Criteria, ControllerError>
where
    F: Fn(&str) -> Option<NetworkType>,
{
    let requested_type: Option<NetworkType> = parse_annotation(annotations, ANNOTATION_NETWORK_TYPE)?;
    let family: IPFamilyMode = parse_annotation(annotations, ANNOTATION_IP_FAMILY)?.unwrap_or(default_family);

    let Some(network) = annotation(annotations, ANNOTATION_SPECIFIED_NETWORK) else {
        return Ok(Criteria::new(requested_type.unwrap_or(default_type), family));
    };

    let actual = network_type_of(network).ok_or_else(|| ipam::IpamError::UnknownNetwork(network.to_string()))?;
    if let Some(requested) = requested_type {
        if requested != actual {
            return Err(ControllerError::InvalidAnnotation {
                key: ANNOTATION_NETWORK_TYPE.to_string(),
                reason: format!("{} conflicts with network {} of type {}", requested, network, actual),
            });
        }
    }
    Ok(Criteria::new(actual, family).with_network(network))
}

/// Whether every selector entry is present in `labels`. An empty selector
/// matches every node.
pub fn selector_matches(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

/// Networks whose node selector admits a node with `node_labels`, sorted.
///
/// A pinned network narrows the result to itself, so a pod pinned to a
/// network its node is not attached to gets no candidates at all.
pub fn eligible_networks<'a>(
    selectors: &'a HashMap<String, BTreeMap<String, String>>,
    node_labels: &BTreeMap<String, String>,
    pinned: Option<&str>,
) -> Vec<&'a str> {
    let mut networks: Vec<&str> = selectors
        .iter()
        .filter(|(network, _)| pinned.is_none_or(|p| p == network.as_str()))
        .filter(|(_, selector)| selector_matches(selector, node_labels))
        .map(|(network, _)| network.as_str())
        .collect();
    networks.sort_unstable();
    networks
}

fn clamp(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// Status patch for a subnet, or `None` when the counters did not change.
pub fn subnet_status_patch(current: Option<&SubnetStatus>, usage: PoolUsage) -> Option<Value> {
    let (total, used, available) = (clamp(usage.total), clamp(usage.used), clamp(usage.available));
    if let Some(status) = current {
        if status.total == total && status.used == used && status.available == available {
            return None;
        }
    }
    Some(json!({
        "status": {
            "total": total,
            "used": used,
            "available": available,
            "lastReconciled": Utc::now().to_rfc3339(),
        }
    }))
}

/// Status patch for a network, or `None` when the subnet count did not change.
pub fn network_status_patch(current: Option<&NetworkStatus>, subnet_count: usize) -> Option<Value> {
    let subnet_count = u32::try_from(subnet_count).unwrap_or(u32::MAX);
    if current.is_some_and(|s| s.subnet_count == subnet_count) {
        return None;
    }
    Some(json!({
        "status": {
            "subnetCount": subnet_count,
            "lastReconciled": Utc::now().to_rfc3339(),
        }
    }))
}

/// Status patch moving an IPInstance to `phase`.
pub fn instance_status_patch(phase: InstancePhase, message: Option<&str>) -> Value {
    json!({
        "status": {
            "phase": phase,
            "message": message,
            "lastTransition": Utc::now().to_rfc3339(),
        }
    })
}

/// Converts persisted instances into records, skipping the ones that cannot
/// be interpreted.
pub fn records_from_instances(instances: &[IPInstance]) -> Vec<AddressRecord> {
    instances
        .iter()
        .filter_map(|instance| match AddressRecord::try_from(instance) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping IPInstance {}: {}", resource_key(&instance.metadata), e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{annotations, deleting_pod, pod, subnet_status};
    use crds::POD_FINALIZER;

    fn overlay_only(name: &str) -> Option<NetworkType> {
        (name == "overlay-net").then_some(NetworkType::Overlay)
    }

    #[test]
    fn test_resource_key() {
        let meta = ObjectMeta {
            name: Some("pod-1".to_string()),
            namespace: Some("ns".to_string()),
            ..Default::default()
        };
        assert_eq!(resource_key(&meta), "ns/pod-1");

        let meta = ObjectMeta {
            name: Some("net".to_string()),
            ..Default::default()
        };
        assert_eq!(resource_key(&meta), "net");
    }

    #[test]
    fn test_finalizer_patches() {
        let mut meta = ObjectMeta {
            finalizers: Some(vec!["other".to_string()]),
            ..Default::default()
        };
        assert!(!has_finalizer(&meta, POD_FINALIZER));

        let patch = add_finalizer_patch(&meta, POD_FINALIZER);
        assert_eq!(patch["metadata"]["finalizers"], json!(["other", POD_FINALIZER]));

        meta.finalizers = Some(vec!["other".to_string(), POD_FINALIZER.to_string()]);
        assert!(has_finalizer(&meta, POD_FINALIZER));
        assert_eq!(add_finalizer_patch(&meta, POD_FINALIZER)["metadata"]["finalizers"], json!(["other", POD_FINALIZER]));
        assert_eq!(remove_finalizer_patch(&meta, POD_FINALIZER)["metadata"]["finalizers"], json!(["other"]));
    }

    #[test]
    fn test_pod_disposition() {
        let running = pod("web-0", Some("node1"), None);
        assert_eq!(pod_disposition(&running, POD_FINALIZER), PodDisposition::Allocate);

        let unscheduled = pod("web-0", None, None);
        assert_eq!(pod_disposition(&unscheduled, POD_FINALIZER), PodDisposition::Skip("unscheduled"));

        let mut host = pod("web-0", Some("node1"), None);
        if let Some(spec) = host.spec.as_mut() {
            spec.host_network = Some(true);
        }
        assert_eq!(pod_disposition(&host, POD_FINALIZER), PodDisposition::Skip("host network"));

        let deleting = deleting_pod("web-0", &[]);
        assert_eq!(pod_disposition(&deleting, POD_FINALIZER), PodDisposition::Skip("terminating"));
        let deleting = deleting_pod("web-0", &[POD_FINALIZER]);
        assert_eq!(pod_disposition(&deleting, POD_FINALIZER), PodDisposition::Release);

        let mut done = pod("job-x", Some("node1"), Some("Succeeded"));
        done.metadata.finalizers = Some(vec![POD_FINALIZER.to_string()]);
        assert_eq!(pod_disposition(&done, POD_FINALIZER), PodDisposition::Release);
    }

    #[test]
    fn test_criteria_defaults() {
        let criteria = criteria_for_pod(None, NetworkType::Underlay, IPFamilyMode::IPv4, overlay_only).unwrap();
        assert_eq!(criteria.network_type, NetworkType::Underlay);
        assert_eq!(criteria.families, IPFamilyMode::IPv4);
        assert_eq!(criteria.network, None);
    }

    #[test]
    fn test_criteria_from_annotations() {
        let a = annotations(&[(ANNOTATION_NETWORK_TYPE, "Overlay"), (ANNOTATION_IP_FAMILY, "DualStack")]);
        let criteria = criteria_for_pod(Some(&a), NetworkType::Underlay, IPFamilyMode::IPv4, overlay_only).unwrap();
        assert_eq!(criteria.network_type, NetworkType::Overlay);
        assert_eq!(criteria.families, IPFamilyMode::DualStack);
    }

    #[test]
    fn test_criteria_specified_network_takes_its_type() {
        let a = annotations(&[(ANNOTATION_SPECIFIED_NETWORK, "overlay-net"), (ANNOTATION_IP_FAMILY, "IPv6")]);
        let criteria = criteria_for_pod(Some(&a), NetworkType::Underlay, IPFamilyMode::IPv4, overlay_only).unwrap();
        assert_eq!(criteria.network_type, NetworkType::Overlay);
        assert_eq!(criteria.network.as_deref(), Some("overlay-net"));
    }

    #[test]
    fn test_criteria_rejects_bad_annotations() {
        let a = annotations(&[(ANNOTATION_IP_FAMILY, "IPv5")]);
        assert!(matches!(
            criteria_for_pod(Some(&a), NetworkType::Underlay, IPFamilyMode::IPv4, overlay_only),
            Err(ControllerError::InvalidAnnotation { .. })
        ));

        let a = annotations(&[(ANNOTATION_SPECIFIED_NETWORK, "overlay-net"), (ANNOTATION_NETWORK_TYPE, "Underlay")]);
        assert!(matches!(
            criteria_for_pod(Some(&a), NetworkType::Underlay, IPFamilyMode::IPv4, overlay_only),
            Err(ControllerError::InvalidAnnotation { .. })
        ));

        let a = annotations(&[(ANNOTATION_SPECIFIED_NETWORK, "missing")]);
        assert!(matches!(
            criteria_for_pod(Some(&a), NetworkType::Underlay, IPFamilyMode::IPv4, overlay_only),
            Err(ControllerError::Ipam(ipam::IpamError::UnknownNetwork(_)))
        ));
    }

    #[test]
    fn test_selector_matches() {
        let labels = annotations(&[("rack", "a1"), ("zone", "east")]);
        assert!(selector_matches(&BTreeMap::new(), &labels));
        assert!(selector_matches(&annotations(&[("rack", "a1")]), &labels));
        assert!(!selector_matches(&annotations(&[("rack", "b2")]), &labels));
        assert!(!selector_matches(&annotations(&[("row", "1")]), &labels));
    }

    #[test]
    fn test_eligible_networks_follow_node_labels() {
        let selectors: HashMap<String, BTreeMap<String, String>> = HashMap::from([
            ("rack-a".to_string(), annotations(&[("rack", "a1")])),
            ("rack-b".to_string(), annotations(&[("rack", "b2")])),
            ("everywhere".to_string(), BTreeMap::new()),
        ]);
        let node = annotations(&[("rack", "a1")]);

        assert_eq!(eligible_networks(&selectors, &node, None), vec!["everywhere", "rack-a"]);
        assert_eq!(eligible_networks(&selectors, &node, Some("rack-a")), vec!["rack-a"]);
        // pinned to a network the node is not attached to
        assert!(eligible_networks(&selectors, &node, Some("rack-b")).is_empty());
        assert!(eligible_networks(&selectors, &node, Some("unknown")).is_empty());
    }

    #[test]
    fn test_subnet_status_patch_only_on_change() {
        let usage = PoolUsage {
            total: 253,
            used: 3,
            available: 250,
        };
        let patch = subnet_status_patch(None, usage).unwrap();
        assert_eq!(patch["status"]["used"], 3);
        assert_eq!(patch["status"]["available"], 250);

        assert!(subnet_status_patch(Some(&subnet_status(253, 3, 250)), usage).is_none());
        assert!(subnet_status_patch(Some(&subnet_status(253, 2, 251)), usage).is_some());
    }

    #[test]
    fn test_subnet_status_patch_clamps_ipv6_sizes() {
        let usage = PoolUsage {
            total: u128::MAX,
            used: 1,
            available: u128::MAX - 1,
        };
        let patch = subnet_status_patch(None, usage).unwrap();
        assert_eq!(patch["status"]["total"], u64::MAX);
    }

    #[test]
    fn test_network_status_patch() {
        let status = NetworkStatus {
            subnet_count: 2,
            last_reconciled: None,
        };
        assert!(network_status_patch(Some(&status), 2).is_none());
        assert_eq!(network_status_patch(Some(&status), 3).unwrap()["status"]["subnetCount"], 3);
    }

    #[test]
    fn test_instance_status_patch() {
        let patch = instance_status_patch(InstancePhase::Pending, None);
        assert_eq!(patch["status"]["phase"], "Pending");
        assert!(patch["status"]["message"].is_null());
        assert!(patch["status"]["lastTransition"].is_string());
    }
}
