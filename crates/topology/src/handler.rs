//! Event handlers for remote topology objects.

use crate::compare::{remote_subnet_changed, remote_vtep_changed};
use crate::queue::WorkQueue;
use crds::{RemoteSubnet, RemoteVtep};
use kube::ResourceExt;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// What the forwarding plane must resync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResyncAction {
    /// Rebuild forwarding entries towards remote nodes
    ReconcileNode,
    /// Rebuild routes towards remote subnets
    ReconcileSubnet,
}

impl fmt::Display for ResyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResyncAction::ReconcileNode => f.write_str("ActionReconcileNode"),
            ResyncAction::ReconcileSubnet => f.write_str("ActionReconcileSubnet"),
        }
    }
}

/// Reaction to create, update and delete events of one kind.
pub trait EventHandler<K>: Send + Sync {
    /// Object appeared
    fn on_create(&self, obj: &K);
    /// Object changed
    fn on_update(&self, old: &K, new: &K);
    /// Object disappeared
    fn on_delete(&self, obj: &K);
}

/// Enqueues a node resync for RemoteVtep changes the forwarding plane uses.
#[derive(Debug, Clone)]
pub struct RemoteVtepHandler {
    queue: Arc<WorkQueue<ResyncAction>>,
}

impl RemoteVtepHandler {
    /// Handler feeding `queue`
    pub fn new(queue: Arc<WorkQueue<ResyncAction>>) -> Self {
        Self { queue }
    }
}

impl EventHandler<RemoteVtep> for RemoteVtepHandler {
    fn on_create(&self, obj: &RemoteVtep) {
        debug!(vtep = %obj.name_any(), "RemoteVtep created");
        self.queue.add(ResyncAction::ReconcileNode);
    }

    fn on_update(&self, old: &RemoteVtep, new: &RemoteVtep) {
        if remote_vtep_changed(old, new) {
            debug!(vtep = %new.name_any(), "RemoteVtep changed");
            self.queue.add(ResyncAction::ReconcileNode);
        }
    }

    fn on_delete(&self, obj: &RemoteVtep) {
        debug!(vtep = %obj.name_any(), "RemoteVtep deleted");
        self.queue.add(ResyncAction::ReconcileNode);
    }
}

/// Enqueues a subnet resync for RemoteSubnet changes.
#[derive(Debug, Clone)]
pub struct RemoteSubnetHandler {
    queue: Arc<WorkQueue<ResyncAction>>,
}

impl RemoteSubnetHandler {
    /// Handler feeding `queue`
    pub fn new(queue: Arc<WorkQueue<ResyncAction>>) -> Self {
        Self { queue }
    }
}

impl EventHandler<RemoteSubnet> for RemoteSubnetHandler {
    fn on_create(&self, obj: &RemoteSubnet) {
        debug!(subnet = %obj.name_any(), "RemoteSubnet created");
        self.queue.add(ResyncAction::ReconcileSubnet);
    }

    fn on_update(&self, old: &RemoteSubnet, new: &RemoteSubnet) {
        if remote_subnet_changed(old, new) {
            debug!(subnet = %new.name_any(), "RemoteSubnet changed");
            self.queue.add(ResyncAction::ReconcileSubnet);
        }
    }

    fn on_delete(&self, obj: &RemoteSubnet) {
        debug!(subnet = %obj.name_any(), "RemoteSubnet deleted");
        self.queue.add(ResyncAction::ReconcileSubnet);
    }
}
