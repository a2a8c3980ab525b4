//! Activation and frame errors

use crate::packet::MacAddr;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Failure of one activation step.
#[derive(Debug, Error)]
pub enum ActivationError {
    /// The gateway did not answer from the source address
    #[error("gateway {gateway} unreachable from {source_addr} on {interface}: {cause}")]
    GatewayUnreachable {
        /// Interface the probe was sent on
        interface: String,
        /// Address being activated
        source_addr: Ipv4Addr,
        /// Gateway that was probed
        gateway: Ipv4Addr,
        /// Timeout or I/O failure
        cause: String,
    },

    /// Another host answers for the address
    #[error("address {address} on {interface} is already in use by {responder}")]
    DuplicateAddress {
        /// Interface the probe was sent on
        interface: String,
        /// Address being activated
        address: Ipv4Addr,
        /// Hardware address of the conflicting host
        responder: MacAddr,
    },

    /// The duplicate probe could not be sent or its replies could not be read
    #[error("duplicate probe for {address} on {interface} failed: {cause}")]
    ProbeFailed {
        /// Interface the probe was sent on
        interface: String,
        /// Address being activated
        address: Ipv4Addr,
        /// I/O failure
        cause: String,
    },

    /// The gratuitous announcement could not be sent
    #[error("announcing {address} on {interface} failed: {cause}")]
    AnnounceFailed {
        /// Interface the announcement was sent on
        interface: String,
        /// Address being activated
        address: Ipv4Addr,
        /// Timeout or I/O failure
        cause: String,
    },

    /// The link could not be opened
    #[error("cannot open link {interface}: {source}")]
    Link {
        /// Interface name
        interface: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl ActivationError {
    /// Short machine-friendly label
    pub fn reason(&self) -> &'static str {
        match self {
            ActivationError::GatewayUnreachable { .. } => "GatewayUnreachable",
            ActivationError::DuplicateAddress { .. } => "DuplicateAddress",
            ActivationError::ProbeFailed { .. } => "ProbeFailed",
            ActivationError::AnnounceFailed { .. } => "AnnounceFailed",
            ActivationError::Link { .. } => "LinkUnavailable",
        }
    }
}

/// A frame that is not an Ethernet/IPv4 ARP packet.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Shorter than an Ethernet header plus ARP body
    #[error("frame too short: {0} bytes")]
    TooShort(usize),

    /// Not an ARP frame
    #[error("unexpected ethertype {0:#06x}")]
    EtherType(u16),

    /// Not Ethernet hardware addresses
    #[error("unexpected hardware type {0}")]
    HardwareType(u16),

    /// Not IPv4 protocol addresses
    #[error("unexpected protocol type {0:#06x}")]
    ProtocolType(u16),

    /// Address lengths other than 6 and 4
    #[error("unexpected address lengths hlen={hlen} plen={plen}")]
    AddressLength {
        /// Hardware address length
        hlen: u8,
        /// Protocol address length
        plen: u8,
    },

    /// Neither request nor reply
    #[error("unexpected operation {0}")]
    Operation(u16),

    /// Unparsable textual MAC address
    #[error("invalid MAC address {0:?}")]
    InvalidMac(String),
}
