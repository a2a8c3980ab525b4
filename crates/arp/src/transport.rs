//! Link I/O seam.

use crate::packet::MacAddr;
use async_trait::async_trait;
use std::io;

/// A link that sends and receives raw Ethernet frames.
///
/// Implementations must be usable from one task for sending and receiving
/// at the same time, hence `&self` receivers.
#[async_trait]
pub trait LinkTransport: Send + Sync {
    /// Interface name, used in errors and logs
    fn name(&self) -> &str;

    /// Hardware address of the interface
    fn hardware_addr(&self) -> MacAddr;

    /// Sends one complete frame.
    async fn send(&self, frame: &[u8]) -> io::Result<()>;

    /// Receives one frame into `buf` and returns its length.
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
}
