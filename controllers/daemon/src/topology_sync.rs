//! Remote cluster topology tracking.
//!
//! RemoteVtep and RemoteSubnet watch streams feed the topology handlers; a
//! pool of workers drains the resulting resync keys into the forwarding
//! plane sink.

use crate::error::DaemonError;
use async_trait::async_trait;
use crds::{RemoteSubnet, RemoteVtep};
use kube::{Api, Client};
use kube_runtime::{WatchStreamExt, watcher};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use topology::{ResyncAction, ResyncSink, TopologyError, TopologyReconciler};
use tracing::info;

/// Forwarding-plane entry point for topology resyncs.
///
/// Route and neighbour programming lives outside this daemon; the sink
/// records each request so the node's configurator can pick it up.
#[derive(Debug, Default)]
pub struct ForwardingSink {
    requests: Mutex<HashMap<ResyncAction, u64>>,
}

#[async_trait]
impl ResyncSink for ForwardingSink {
    async fn resync(&self, action: ResyncAction) -> Result<(), TopologyError> {
        let count = {
            let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
            let count = requests.entry(action).or_default();
            *count += 1;
            *count
        };
        info!("Forwarding plane resync {} requested (#{})", action, count);
        Ok(())
    }
}

/// Spawns the topology watchers and resync workers into `tasks`.
pub fn spawn(
    tasks: &mut JoinSet<Result<(), DaemonError>>,
    client: Client,
    reconciler: TopologyReconciler,
    sink: Arc<ForwardingSink>,
    workers: usize,
) {
    let vtep_api: Api<RemoteVtep> = Api::all(client.clone());
    let vtep_handler = reconciler.vtep_handler();
    tasks.spawn(async move {
        info!("Starting RemoteVtep watcher");
        let stream = watcher(vtep_api, watcher::Config::default()).default_backoff();
        topology::drive(stream, &vtep_handler, "RemoteVtep").await;
        Err(DaemonError::Watch("RemoteVtep watch stream ended".to_string()))
    });

    let subnet_api: Api<RemoteSubnet> = Api::all(client);
    let subnet_handler = reconciler.subnet_handler();
    tasks.spawn(async move {
        info!("Starting RemoteSubnet watcher");
        let stream = watcher(subnet_api, watcher::Config::default()).default_backoff();
        topology::drive(stream, &subnet_handler, "RemoteSubnet").await;
        Err(DaemonError::Watch("RemoteSubnet watch stream ended".to_string()))
    });

    for worker in 0..workers {
        let reconciler = reconciler.clone();
        let sink = Arc::clone(&sink);
        tasks.spawn(async move {
            info!("Starting resync worker {}", worker);
            reconciler.run_worker(sink.as_ref()).await;
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use topology::{EventHandler, WorkQueue};

    fn handled(sink: &ForwardingSink, action: ResyncAction) -> u64 {
        sink.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&action)
            .copied()
            .unwrap_or_default()
    }

    fn vtep(ip: &str) -> RemoteVtep {
        let mut vtep = RemoteVtep::new("node-b", Default::default());
        vtep.spec.cluster_name = "cluster-b".to_string();
        vtep.spec.vtep_info.ip = ip.to_string();
        vtep.spec.vtep_info.mac = "02:00:00:00:00:0b".to_string();
        vtep
    }

    #[tokio::test]
    async fn test_vtep_burst_reaches_sink_once() {
        let reconciler = TopologyReconciler::new(Arc::new(WorkQueue::new()));
        let handler = reconciler.vtep_handler();
        let sink = Arc::new(ForwardingSink::default());

        handler.on_create(&vtep("192.168.0.2"));
        handler.on_update(&vtep("192.168.0.2"), &vtep("192.168.0.3"));
        handler.on_update(&vtep("192.168.0.3"), &vtep("192.168.0.3"));
        reconciler.shutdown();

        tokio::time::timeout(Duration::from_secs(1), reconciler.run_worker(sink.as_ref()))
            .await
            .unwrap();
        assert_eq!(handled(&sink, ResyncAction::ReconcileNode), 1);
        assert_eq!(handled(&sink, ResyncAction::ReconcileSubnet), 0);
    }
}
