//! Address management errors.

use crds::{IPVersion, NetworkType};
use std::net::IpAddr;
use thiserror::Error;

/// Errors raised by the allocator, its pools and the retention store.
///
/// None of these are retried internally; the caller's reconcile loop owns
/// the retry policy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IpamError {
    /// Every eligible subnet of the requested type and family is full
    #[error("no free {version} address left in eligible {network_type} subnets")]
    ExhaustedPool {
        /// Requested network type
        network_type: NetworkType,
        /// Family that could not be served
        version: IPVersion,
    },

    /// No subnet matches the requested type and family at all
    #[error("no eligible {network_type} subnet serves {version}")]
    NoEligibleSubnet {
        /// Requested network type
        network_type: NetworkType,
        /// Family that could not be served
        version: IPVersion,
    },

    /// Retained records disagree with the identity asking for them, or the
    /// identity's ordinal cannot be derived
    #[error("retained addresses of {workload} are inconsistent: {reason}")]
    RetentionLookupInconsistent {
        /// namespace/name of the workload
        workload: String,
        /// What did not match
        reason: String,
    },

    /// Subnet is not known to the allocator
    #[error("unknown subnet: {0}")]
    UnknownSubnet(String),

    /// Network is not known to the allocator
    #[error("unknown network: {0}")]
    UnknownNetwork(String),

    /// Subnet definition cannot be turned into a pool
    #[error("invalid subnet {subnet}: {reason}")]
    InvalidSubnet {
        /// Subnet name
        subnet: String,
        /// Validation failure
        reason: String,
    },

    /// Subnet still holds addresses
    #[error("subnet {subnet} still holds {used} addresses")]
    SubnetInUse {
        /// Subnet name
        subnet: String,
        /// Addresses in use
        used: u128,
    },

    /// Address lies outside the subnet's allocatable range
    #[error("address {address} is outside the allocatable range of subnet {subnet}")]
    AddressOutOfRange {
        /// Subnet name
        subnet: String,
        /// Offending address
        address: IpAddr,
    },

    /// Persisted record cannot be interpreted
    #[error("invalid address record: {0}")]
    InvalidRecord(String),
}

impl IpamError {
    pub(crate) fn inconsistent(workload: impl Into<String>, reason: impl Into<String>) -> Self {
        IpamError::RetentionLookupInconsistent {
            workload: workload.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_subnet(subnet: &str, reason: impl Into<String>) -> Self {
        IpamError::InvalidSubnet {
            subnet: subnet.to_string(),
            reason: reason.into(),
        }
    }

    /// Short machine-friendly label, used for metrics and status messages
    pub fn reason(&self) -> &'static str {
        match self {
            IpamError::ExhaustedPool { .. } => "ExhaustedPool",
            IpamError::NoEligibleSubnet { .. } => "NoEligibleSubnet",
            IpamError::RetentionLookupInconsistent { .. } => "RetentionLookupInconsistent",
            IpamError::UnknownSubnet(_) => "UnknownSubnet",
            IpamError::UnknownNetwork(_) => "UnknownNetwork",
            IpamError::InvalidSubnet { .. } => "InvalidSubnet",
            IpamError::SubnetInUse { .. } => "SubnetInUse",
            IpamError::AddressOutOfRange { .. } => "AddressOutOfRange",
            IpamError::InvalidRecord(_) => "InvalidRecord",
        }
    }
}
