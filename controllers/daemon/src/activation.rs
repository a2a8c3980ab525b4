//! Activation of node-local underlay addresses.
//!
//! The manager leaves every freshly bound IPInstance in the Pending phase.
//! The daemon on the bound node validates underlay IPv4 addresses on the
//! wire and records the verdict in the instance status. Other records need
//! no link-layer work and go straight to Active.

use crate::error::DaemonError;
use arp::{ActivationError, ActivationValidator, LinkTransport};
use chrono::Utc;
use crds::{IPInstance, IPVersion, InstancePhase, LABEL_NODE, Network, NetworkType};
use futures::StreamExt;
use ipam::AddressRecord;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use kube_runtime::{Controller, controller::Action, watcher};
use serde_json::{Value, json};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What the daemon has to do with one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationPlan {
    /// Not ours, or already settled
    Skip,
    /// No link-layer validation applies
    MarkActive,
    /// Validate `source` against `gateway` on the underlay link
    Validate {
        /// Workload address
        source: Ipv4Addr,
        /// Subnet gateway
        gateway: Ipv4Addr,
    },
    /// Cannot be validated
    Reject(String),
}

/// Decides the activation work for `record`, bound on `node` and currently
/// in `phase`, in a network of `network_type`.
pub fn plan(record: &AddressRecord, phase: InstancePhase, node: &str, network_type: NetworkType) -> ActivationPlan {
    if record.binding.node_name != node || phase != InstancePhase::Pending {
        return ActivationPlan::Skip;
    }
    if network_type != NetworkType::Underlay || record.version() != IPVersion::IPv4 {
        return ActivationPlan::MarkActive;
    }
    match (record.ip(), record.gateway) {
        (IpAddr::V4(source), Some(IpAddr::V4(gateway))) => ActivationPlan::Validate { source, gateway },
        _ => ActivationPlan::Reject(format!("subnet {} has no IPv4 gateway to probe", record.subnet)),
    }
}

/// Runs the validator and turns its verdict into a phase and message.
///
/// Link errors are returned so the attempt is retried; every other failure
/// is a verdict on the address itself.
pub async fn validate<L>(
    validator: &ActivationValidator,
    link: &L,
    source: Ipv4Addr,
    gateway: Ipv4Addr,
) -> Result<(InstancePhase, Option<String>), ActivationError>
where
    L: LinkTransport + ?Sized,
{
    match validator.activate(link, source, gateway).await {
        Ok(()) => Ok((InstancePhase::Active, None)),
        Err(e @ ActivationError::Link { .. }) => Err(e),
        Err(e) => Ok((InstancePhase::Failed, Some(format!("{}: {}", e.reason(), e)))),
    }
}

fn status_patch(phase: InstancePhase, message: Option<&str>) -> Value {
    json!({
        "status": {
            "phase": phase,
            "message": message,
            "lastTransition": Utc::now().to_rfc3339(),
        }
    })
}

#[cfg(target_os = "linux")]
fn open_link(interface: &str) -> Result<Box<dyn LinkTransport>, DaemonError> {
    Ok(Box::new(arp::RawLink::open(interface)?))
}

#[cfg(not(target_os = "linux"))]
fn open_link(interface: &str) -> Result<Box<dyn LinkTransport>, DaemonError> {
    Err(DaemonError::InvalidConfig(format!(
        "raw link access on {} requires Linux",
        interface
    )))
}

/// Activates IPInstances bound to this node.
pub struct Activator {
    client: Client,
    network_api: Api<Network>,
    node_name: String,
    interface: String,
    validator: ActivationValidator,
}

impl Activator {
    pub fn new(client: Client, node_name: String, interface: String, validator: ActivationValidator) -> Self {
        Self {
            network_api: Api::all(client.clone()),
            client,
            node_name,
            interface,
            validator,
        }
    }

    pub async fn reconcile_instance(&self, instance: &IPInstance) -> Result<Action, DaemonError> {
        let phase = instance.status.as_ref().map(|s| s.phase).unwrap_or_default();
        if phase != InstancePhase::Pending {
            return Ok(Action::await_change());
        }

        let record = AddressRecord::try_from(instance)?;
        let network_type = self.network_api.get(&record.network).await?.spec.network_type;

        let (phase, message) = match plan(&record, phase, &self.node_name, network_type) {
            ActivationPlan::Skip => return Ok(Action::await_change()),
            ActivationPlan::MarkActive => (InstancePhase::Active, None),
            ActivationPlan::Reject(reason) => (InstancePhase::Failed, Some(reason)),
            ActivationPlan::Validate { source, gateway } => {
                // the link is opened per activation; the socket only lives for the exchange
                let link = open_link(&self.interface)?;
                validate(&self.validator, link.as_ref(), source, gateway).await?
            }
        };

        match phase {
            InstancePhase::Failed => warn!(
                "Activation of {} for {} failed: {}",
                record.address,
                record.binding.pod_name,
                message.as_deref().unwrap_or_default()
            ),
            _ => info!("Address {} of {} is active", record.address, record.binding.pod_name),
        }

        let api: Api<IPInstance> = Api::namespaced(self.client.clone(), &record.namespace);
        api.patch_status(
            &record.name,
            &PatchParams::default(),
            &Patch::Merge(&status_patch(phase, message.as_deref())),
        )
        .await?;
        Ok(Action::await_change())
    }

    /// Watches the IPInstances labelled with this node until the stream ends.
    pub async fn run(self: Arc<Self>) -> Result<(), DaemonError> {
        info!("Starting IPInstance activation watcher on {}", self.interface);
        let api: Api<IPInstance> = Api::all(self.client.clone());
        let selector = format!("{}={}", LABEL_NODE, self.node_name);

        let reconcile = |instance: Arc<IPInstance>, ctx: Arc<Activator>| async move {
            debug!("Reconciling IPInstance {}", instance.name_any());
            ctx.reconcile_instance(&instance).await
        };
        let error_policy = |instance: Arc<IPInstance>, error: &DaemonError, _ctx: Arc<Activator>| {
            error!("Activation error for IPInstance {}: {}", instance.name_any(), error);
            Action::requeue(Duration::from_secs(30))
        };

        Controller::new(api, watcher::Config::default().labels(&selector))
            .run(reconcile, error_policy, self)
            .for_each(|res| async move {
                if let Err(e) = res {
                    debug!("Activation controller error: {}", e);
                }
            })
            .await;

        Err(DaemonError::Watch("IPInstance activation watch ended".to_string()))
    }
}
