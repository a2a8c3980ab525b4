//! Netplane address management
//!
//! Hands out unique workload addresses from subnet pools and keeps the
//! addresses of stateful workloads across pod recreation.
//!
//! # Example
//!
//! ```
//! use crds::{IPFamilyMode, IPVersion, NetworkType, ReferredObject};
//! use ipam::{AddressAllocator, Criteria, RetentionPolicy, SubnetConfig, WorkloadIdentity};
//!
//! # fn example() -> Result<(), ipam::IpamError> {
//! let allocator = AddressAllocator::new(RetentionPolicy::default());
//! allocator.upsert_network("underlay", NetworkType::Underlay);
//! allocator.upsert_subnet(SubnetConfig::new(
//!     "underlay-v4",
//!     "underlay",
//!     IPVersion::IPv4,
//!     "10.0.0.0/24".parse().unwrap(),
//! ))?;
//!
//! let identity = WorkloadIdentity::new(
//!     "default",
//!     "web-abc",
//!     "uid-1",
//!     "node1",
//!     ReferredObject::pod("web-abc", "uid-1"),
//!     &RetentionPolicy::default(),
//! )?;
//! let records = allocator.allocate(
//!     &identity,
//!     &Criteria::new(NetworkType::Underlay, IPFamilyMode::IPv4),
//!     None,
//! )?;
//! assert_eq!(records.len(), 1);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod allocator;
pub mod convert;
pub mod error;
pub mod identity;
pub mod mac;
pub mod pool;
pub mod record;
pub mod retention;

pub use allocator::{AddressAllocator, Criteria, ReleaseOutcome, RestoreReport, UsageReport};
pub use convert::SubnetConfig;
pub use error::IpamError;
pub use identity::{LeaseKey, RetentionKey, RetentionPolicy, WorkloadIdentity, parse_ordinal};
pub use pool::{PoolUsage, SubnetPool};
pub use record::AddressRecord;
pub use retention::RetentionStore;
