//! Topology errors

use thiserror::Error;

/// Errors of the topology reconciler and its sinks.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// The forwarding plane could not apply a resync
    #[error("resync {action} failed: {message}")]
    Resync {
        /// Action that failed
        action: String,
        /// Failure detail
        message: String,
    },

    /// The watch stream of a remote resource failed
    #[error("watch failed: {0}")]
    Watch(String),
}
