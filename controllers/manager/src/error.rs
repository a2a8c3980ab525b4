//! Manager error types.
//!
//! Library errors from the allocator and the Kubernetes client are wrapped
//! here so every reconcile path returns one type to the runtime.

use ipam::IpamError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the netplane manager.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Address management error
    #[error("Address management error: {0}")]
    Ipam(#[from] IpamError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Pod annotation that cannot be interpreted
    #[error("Invalid annotation {key}: {reason}")]
    InvalidAnnotation {
        /// Annotation key
        key: String,
        /// Parse failure
        reason: String,
    },

    /// Cleanup blocked on a resource being deleted
    #[error("Finalizer blocked: {0}")]
    Finalizer(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Metrics endpoint I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControllerError {
    /// Short label used for the failure counter
    pub fn reason(&self) -> &'static str {
        match self {
            ControllerError::Kube(_) => "KubeError",
            ControllerError::Ipam(e) => e.reason(),
            ControllerError::InvalidConfig(_) => "InvalidConfig",
            ControllerError::InvalidAnnotation { .. } => "InvalidAnnotation",
            ControllerError::Finalizer(_) => "FinalizerBlocked",
            ControllerError::Watch(_) => "Watch",
            ControllerError::Metrics(_) => "Metrics",
            ControllerError::Io(_) => "Io",
        }
    }
}
