//! Remote topology change detection
//!
//! Watches RemoteVtep and RemoteSubnet objects mirrored from peer clusters
//! and turns relevant changes into resync signals for the forwarding plane.
//! Signals are collapsed in a [`WorkQueue`], so a burst of changes causes
//! one resync.

pub mod compare;
pub mod error;
pub mod events;
pub mod handler;
pub mod queue;
pub mod reconciler;

pub use error::TopologyError;
pub use events::{EventTranslator, ResourceEvent, dispatch, drive};
pub use handler::{EventHandler, RemoteSubnetHandler, RemoteVtepHandler, ResyncAction};
pub use queue::WorkQueue;
pub use reconciler::{ResyncSink, TopologyReconciler};
