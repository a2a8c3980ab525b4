//! Owner references recorded in address bindings
//!
//! An address binding names the object that "owns" the address: the pod
//! itself for ordinary workloads, or the pod's controlling owner (for example
//! a StatefulSet) for workloads whose addresses outlive individual pods.

use k8s_openapi::api::core::v1::Pod;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Object that owns an address binding.
///
/// Mirrors the `kind`/`name`/`uid` triple of a Kubernetes owner reference.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReferredObject {
    /// Kind of the referenced object (e.g., "Pod", "StatefulSet")
    pub kind: String,

    /// Name of the referenced object
    pub name: String,

    /// UID of the referenced object
    #[serde(default)]
    pub uid: String,
}

impl ReferredObject {
    /// Create a new reference
    pub fn new(kind: impl Into<String>, name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            uid: uid.into(),
        }
    }

    /// Reference pointing at a pod itself
    pub fn pod(name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self::new("Pod", name, uid)
    }

    /// Returns the referred object for a pod: its controlling owner if any,
    /// otherwise the pod itself.
    pub fn for_pod(pod: &Pod) -> Self {
        let controller = pod
            .metadata
            .owner_references
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|r| r.controller.unwrap_or(false));

        match controller {
            Some(owner) => Self::new(owner.kind.clone(), owner.name.clone(), owner.uid.clone()),
            None => Self::pod(
                pod.metadata.name.clone().unwrap_or_default(),
                pod.metadata.uid.clone().unwrap_or_default(),
            ),
        }
    }

    /// Whether the reference names the pod itself rather than a controller
    pub fn is_pod(&self) -> bool {
        self.kind == "Pod"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

    fn pod(owner: Option<OwnerReference>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("pod-3".to_string()),
                uid: Some("pod-uid".to_string()),
                owner_references: owner.map(|o| vec![o]),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_for_pod_without_owner_refers_to_pod() {
        let referred = ReferredObject::for_pod(&pod(None));
        assert_eq!(referred, ReferredObject::pod("pod-3", "pod-uid"));
        assert!(referred.is_pod());
    }

    #[test]
    fn test_for_pod_uses_controller_owner() {
        let owner = OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: "StatefulSet".to_string(),
            name: "web".to_string(),
            uid: "sts-uid".to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        };
        let referred = ReferredObject::for_pod(&pod(Some(owner)));
        assert_eq!(referred, ReferredObject::new("StatefulSet", "web", "sts-uid"));
    }

    #[test]
    fn test_for_pod_ignores_non_controller_owner() {
        let owner = OwnerReference {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            name: "cfg".to_string(),
            uid: "cm-uid".to_string(),
            controller: None,
            block_owner_deletion: None,
        };
        assert!(ReferredObject::for_pod(&pod(Some(owner))).is_pod());
    }
}
