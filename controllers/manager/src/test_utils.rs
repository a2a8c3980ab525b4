//! Test data builders.

#![cfg(test)]

use crds::SubnetStatus;
use k8s_openapi::api::core::v1::{Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::json;
use std::collections::BTreeMap;

pub fn annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

pub fn pod(name: &str, node: Option<&str>, phase: Option<&str>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            uid: Some(format!("{}-uid", name)),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: node.map(ToString::to_string),
            ..Default::default()
        }),
        status: phase.map(|p| PodStatus {
            phase: Some(p.to_string()),
            ..Default::default()
        }),
    }
}

/// Pod with a deletion timestamp, built through serde so the timestamp type
/// does not leak into the tests.
pub fn deleting_pod(name: &str, finalizers: &[&str]) -> Pod {
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": name,
            "namespace": "default",
            "uid": format!("{}-uid", name),
            "deletionTimestamp": "2024-05-01T10:00:00Z",
            "finalizers": finalizers,
        },
        "spec": { "nodeName": "node1", "containers": [] },
    }))
    .unwrap()
}

pub fn subnet_status(total: u64, used: u64, available: u64) -> SubnetStatus {
    SubnetStatus {
        total,
        used,
        available,
        last_reconciled: None,
    }
}
