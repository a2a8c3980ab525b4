//! Resync worker.

use crate::error::TopologyError;
use crate::handler::{RemoteSubnetHandler, RemoteVtepHandler, ResyncAction};
use crate::queue::WorkQueue;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The forwarding-plane configurator a resync is handed to.
#[async_trait]
pub trait ResyncSink: Send + Sync {
    /// Rebuilds whatever `action` names.
    async fn resync(&self, action: ResyncAction) -> Result<(), TopologyError>;
}

/// Owns the resync queue and drains it into a [`ResyncSink`].
#[derive(Debug, Clone)]
pub struct TopologyReconciler {
    queue: Arc<WorkQueue<ResyncAction>>,
}

impl Default for TopologyReconciler {
    fn default() -> Self {
        Self::new(Arc::new(WorkQueue::new()))
    }
}

impl TopologyReconciler {
    /// Reconciler draining `queue`
    pub fn new(queue: Arc<WorkQueue<ResyncAction>>) -> Self {
        Self { queue }
    }

    /// The shared queue
    pub fn queue(&self) -> &Arc<WorkQueue<ResyncAction>> {
        &self.queue
    }

    /// Handler to register for RemoteVtep events
    pub fn vtep_handler(&self) -> RemoteVtepHandler {
        RemoteVtepHandler::new(Arc::clone(&self.queue))
    }

    /// Handler to register for RemoteSubnet events
    pub fn subnet_handler(&self) -> RemoteSubnetHandler {
        RemoteSubnetHandler::new(Arc::clone(&self.queue))
    }

    /// Processes keys until the queue is shut down. A failed resync is
    /// retried with backoff; a successful one clears the key's failures.
    pub async fn run_worker<S>(&self, sink: &S)
    where
        S: ResyncSink + ?Sized,
    {
        while let Some(action) = self.queue.get().await {
            debug!(action = %action, "Resyncing");
            match sink.resync(action).await {
                Ok(()) => {
                    self.queue.forget(&action);
                    info!(action = %action, "Resync complete");
                }
                Err(e) => {
                    warn!(
                        action = %action,
                        attempts = self.queue.num_requeues(&action) + 1,
                        error = %e,
                        "Resync failed"
                    );
                    self.queue.add_rate_limited(action);
                }
            }
            self.queue.done(&action);
        }
        debug!("Resync worker stopped");
    }

    /// Stops every worker once pending keys are drained.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }
}
