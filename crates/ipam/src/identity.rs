//! Workload identities and the keys derived from them.
//!
//! Ordinary pods are identified by their pod; stateful pods are identified by
//! their controlling owner plus the ordinal at the end of their name, which
//! stays the same when the pod is recreated with a new UID or on a new node.

use crate::error::IpamError;
use crds::{Binding, ReferredObject, StatefulInfo};
use k8s_openapi::api::core::v1::Pod;
use std::fmt;

/// Parses the ordinal suffix of a workload name: the integer after the last
/// `-` separator.
///
/// Returns `None` when there is no separator or the suffix is not a plain
/// non-negative decimal number fitting an `i32`.
pub fn parse_ordinal(name: &str) -> Option<i32> {
    let (_, suffix) = name.rsplit_once('-')?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Which controller kinds get their pods' addresses retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    stateful_kinds: Vec<String>,
}

impl RetentionPolicy {
    /// Policy retaining addresses for pods owned by the given kinds
    pub fn new<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            stateful_kinds: kinds.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether pods owned by `kind` keep their addresses across recreation
    pub fn is_stateful_kind(&self, kind: &str) -> bool {
        self.stateful_kinds.iter().any(|k| k == kind)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(["StatefulSet"])
    }
}

/// Key of the active addresses of one pod: namespace and pod name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaseKey {
    /// Pod namespace
    pub namespace: String,
    /// Pod name
    pub pod_name: String,
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.pod_name)
    }
}

/// Key of retained addresses: owner plus ordinal, never the pod UID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetentionKey {
    /// Namespace of the owner
    pub namespace: String,
    /// Controlling owner
    pub owner: ReferredObject,
    /// Ordinal of the workload
    pub ordinal: i32,
}

impl fmt::Display for RetentionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}#{}",
            self.namespace, self.owner.kind, self.owner.name, self.ordinal
        )
    }
}

/// The workload an allocation is made for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadIdentity {
    /// Pod namespace
    pub namespace: String,
    /// Pod name
    pub pod_name: String,
    /// Pod UID, changes across recreation
    pub pod_uid: String,
    /// Node the pod is scheduled to
    pub node_name: String,
    /// Owner of the binding: the controller for stateful pods, otherwise the pod
    pub referred: ReferredObject,
    /// Ordinal, present only for stateful workloads
    pub ordinal: Option<i32>,
}

impl WorkloadIdentity {
    /// Builds an identity, deriving the ordinal when the owner kind is
    /// stateful under `policy`.
    ///
    /// A stateful owner whose pod name carries no ordinal is rejected, since
    /// its retained addresses could never be found again.
    pub fn new(
        namespace: impl Into<String>,
        pod_name: impl Into<String>,
        pod_uid: impl Into<String>,
        node_name: impl Into<String>,
        referred: ReferredObject,
        policy: &RetentionPolicy,
    ) -> Result<Self, IpamError> {
        let namespace = namespace.into();
        let pod_name = pod_name.into();

        let ordinal = if !referred.is_pod() && policy.is_stateful_kind(&referred.kind) {
            let ordinal = parse_ordinal(&pod_name).ok_or_else(|| {
                IpamError::inconsistent(
                    format!("{namespace}/{pod_name}"),
                    format!("owner {} {} requires an ordinal pod name", referred.kind, referred.name),
                )
            })?;
            Some(ordinal)
        } else {
            None
        };

        Ok(Self {
            namespace,
            pod_name,
            pod_uid: pod_uid.into(),
            node_name: node_name.into(),
            referred,
            ordinal,
        })
    }

    /// Builds the identity of a scheduled pod.
    pub fn from_pod(pod: &Pod, policy: &RetentionPolicy) -> Result<Self, IpamError> {
        let name = pod
            .metadata
            .name
            .clone()
            .ok_or_else(|| IpamError::InvalidRecord("pod without name".to_string()))?;
        let namespace = pod.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
        let uid = pod.metadata.uid.clone().unwrap_or_default();
        let node = pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.clone())
            .unwrap_or_default();

        Self::new(namespace, name, uid, node, ReferredObject::for_pod(pod), policy)
    }

    /// Whether addresses of this workload survive pod deletion
    pub fn is_stateful(&self) -> bool {
        self.ordinal.is_some()
    }

    /// Key of the pod's active addresses
    pub fn lease_key(&self) -> LeaseKey {
        LeaseKey {
            namespace: self.namespace.clone(),
            pod_name: self.pod_name.clone(),
        }
    }

    /// Key of the workload's retained addresses, for stateful workloads
    pub fn retention_key(&self) -> Option<RetentionKey> {
        self.ordinal.map(|ordinal| RetentionKey {
            namespace: self.namespace.clone(),
            owner: self.referred.clone(),
            ordinal,
        })
    }

    /// Binding describing this workload as the current holder
    pub fn binding(&self) -> Binding {
        Binding {
            pod_uid: self.pod_uid.clone(),
            pod_name: self.pod_name.clone(),
            node_name: self.node_name.clone(),
            referred_object: self.referred.clone(),
            stateful: self.ordinal.map(|index| StatefulInfo { index: Some(index) }),
        }
    }
}

impl fmt::Display for WorkloadIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.pod_name)
    }
}
