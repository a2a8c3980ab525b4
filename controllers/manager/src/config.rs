//! Manager configuration, read from environment variables at startup.

use crate::error::ControllerError;
use crds::{IPFamilyMode, NetworkType};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 300;
const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_RECONCILE_CONCURRENCY: u16 = 4;

/// Validated manager settings.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Namespace to watch pods and records in; `None` watches all namespaces
    pub watch_namespace: Option<String>,
    /// Network type used when a pod carries no network-type annotation
    pub default_network_type: NetworkType,
    /// Address families used when a pod carries no ip-family annotation
    pub default_ip_family: IPFamilyMode,
    /// Owner kinds whose pods keep their addresses across recreation
    pub stateful_kinds: Vec<String>,
    /// Period of the record / pool consistency pass
    pub resync_interval: Duration,
    /// Listen address of the metrics and probe endpoint
    pub metrics_addr: SocketAddr,
    /// Concurrent reconciliations per watched kind
    pub reconcile_concurrency: u16,
}

impl ManagerConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through `lookup`; unset and empty values take
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let default_network_type = match get("DEFAULT_NETWORK_TYPE") {
            Some(raw) => raw
                .parse()
                .map_err(|e| ControllerError::InvalidConfig(format!("DEFAULT_NETWORK_TYPE: {e}")))?,
            None => NetworkType::Underlay,
        };

        let default_ip_family = match get("DEFAULT_IP_FAMILY") {
            Some(raw) => raw
                .parse()
                .map_err(|e| ControllerError::InvalidConfig(format!("DEFAULT_IP_FAMILY: {e}")))?,
            None => IPFamilyMode::IPv4,
        };

        let stateful_kinds: Vec<String> = match get("STATEFUL_KINDS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(ToString::to_string)
                .collect(),
            None => vec!["StatefulSet".to_string()],
        };

        let resync_secs = match get("RESYNC_INTERVAL_SECS") {
            Some(raw) => raw.parse::<u64>().map_err(|e| {
                ControllerError::InvalidConfig(format!("RESYNC_INTERVAL_SECS {raw:?}: {e}"))
            })?,
            None => DEFAULT_RESYNC_INTERVAL_SECS,
        };
        if resync_secs == 0 {
            return Err(ControllerError::InvalidConfig(
                "RESYNC_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }

        let metrics_addr = get("METRICS_ADDR")
            .unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ControllerError::InvalidConfig(format!("METRICS_ADDR: {e}")))?;

        let reconcile_concurrency = match get("RECONCILE_CONCURRENCY") {
            Some(raw) => raw.parse::<u16>().map_err(|e| {
                ControllerError::InvalidConfig(format!("RECONCILE_CONCURRENCY {raw:?}: {e}"))
            })?,
            None => DEFAULT_RECONCILE_CONCURRENCY,
        };

        Ok(Self {
            watch_namespace: get("WATCH_NAMESPACE"),
            default_network_type,
            default_ip_family,
            stateful_kinds,
            resync_interval: Duration::from_secs(resync_secs),
            metrics_addr,
            reconcile_concurrency,
        })
    }
}
