//! Link-layer activation of workload addresses
//!
//! Before an underlay IPv4 address is put to use on a node it is validated
//! on the wire in three steps:
//!
//! 1. the subnet gateway must answer an ARP request sent from the address,
//! 2. nobody else may answer a duplicate-address probe for it,
//! 3. the address is announced with a gratuitous ARP.
//!
//! Link I/O goes through [`LinkTransport`]. [`RawLink`] is the production
//! transport on Linux; [`mock::MockLink`] (feature `test-util`) scripts
//! replies for tests.

pub mod error;
pub mod packet;
pub mod transport;
pub mod validator;

#[cfg(target_os = "linux")]
pub mod raw;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use error::{ActivationError, FrameError};
pub use packet::{ArpPacket, MacAddr, Operation};
pub use transport::LinkTransport;
pub use validator::ActivationValidator;

#[cfg(target_os = "linux")]
pub use raw::RawLink;
