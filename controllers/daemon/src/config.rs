//! Daemon configuration, read from environment variables at startup.

use crate::error::DaemonError;
use std::env;
use std::time::Duration;

const DEFAULT_ARP_TIMEOUT_MS: u64 = 1000;
const DEFAULT_QUEUE_WORKERS: usize = 1;

/// Validated daemon settings.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Node this daemon runs on
    pub node_name: String,
    /// Underlay interface used for activation; activation is off without it
    pub underlay_interface: Option<String>,
    /// Per-step timeout of the link-layer validation
    pub arp_timeout: Duration,
    /// Workers draining the topology resync queue
    pub queue_workers: usize,
}

impl DaemonConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, DaemonError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DaemonError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let node_name = get("NODE_NAME").ok_or_else(|| {
            DaemonError::InvalidConfig("NODE_NAME environment variable is required".to_string())
        })?;

        let arp_timeout_ms = match get("ARP_TIMEOUT_MS") {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|e| DaemonError::InvalidConfig(format!("ARP_TIMEOUT_MS {raw:?}: {e}")))?,
            None => DEFAULT_ARP_TIMEOUT_MS,
        };
        if arp_timeout_ms == 0 {
            return Err(DaemonError::InvalidConfig(
                "ARP_TIMEOUT_MS must be greater than zero".to_string(),
            ));
        }

        let queue_workers = match get("QUEUE_WORKERS") {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|e| DaemonError::InvalidConfig(format!("QUEUE_WORKERS {raw:?}: {e}")))?,
            None => DEFAULT_QUEUE_WORKERS,
        };
        if queue_workers == 0 {
            return Err(DaemonError::InvalidConfig(
                "QUEUE_WORKERS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            node_name,
            underlay_interface: get("UNDERLAY_INTERFACE"),
            arp_timeout: Duration::from_millis(arp_timeout_ms),
            queue_workers,
        })
    }
}
