//! Netplane CRD Definitions
//!
//! Kubernetes Custom Resource Definitions shared by the netplane manager,
//! the per-node daemon and the address management libraries.

pub mod constants;
pub mod references;
pub mod network;
pub mod subnet;
pub mod ip_instance;
pub mod remote_vtep;
pub mod remote_subnet;

pub use constants::*;
pub use references::*;
pub use network::*;
pub use subnet::*;
pub use ip_instance::*;
pub use remote_vtep::*;
pub use remote_subnet::*;

/// API group for every netplane CRD.
pub const API_GROUP: &str = "networking.netplane.io";
