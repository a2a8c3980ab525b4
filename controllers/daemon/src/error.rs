//! Daemon error types.

use arp::ActivationError;
use ipam::IpamError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the node daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Link-layer activation error that is worth retrying
    #[error("Activation error: {0}")]
    Activation(#[from] ActivationError),

    /// IPInstance that cannot be interpreted
    #[error("Invalid address record: {0}")]
    Record(#[from] IpamError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}
