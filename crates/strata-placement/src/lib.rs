//! Deterministic segment ownership for partitioned data grids.
//!
//! The 31-bit hash space is split into a fixed number of segments, and each
//! segment is given an ordered list of owners (primary first) drawn from the
//! current cluster members. Placement depends only on the current members
//! and their capacity factors, never on how the cluster got there, so every
//! node computes the same [`ConsistentHash`] independently.
//!
//! Owners are picked per segment from per-member rings of virtual nodes,
//! closest first, subject to capacity-proportional budgets tracked in
//! [`OwnershipStatistics`]. The topology-aware variant also spreads a
//! segment's owners across sites, racks and machines.
//!
//! [`SyncConsistentHashFactory`] builds consistent hashes and derives new
//! ones when members leave ([`update_members`]), when ownership should be
//! recomputed ([`rebalance`]) or when two partitions merge ([`union`]).
//! [`ReplicatedConsistentHashFactory`] does the same for fully replicated
//! caches.
//!
//! [`update_members`]: ConsistentHashFactory::update_members
//! [`rebalance`]: ConsistentHashFactory::rebalance
//! [`union`]: ConsistentHashFactory::union

mod assign;
pub mod capacity;
mod consistent_hash;
pub mod error;
mod factory;
mod replicated;
pub mod segment;
mod stats;
pub mod topology;
pub mod vnode;

pub use assign::{BalancedPolicy, OwnerAcceptancePolicy, TopologyAwarePolicy};
pub use capacity::CapacityModel;
pub use consistent_hash::{ConsistentHash, Migration};
pub use error::PlacementError;
pub use factory::{ConsistentHashFactory, SyncConsistentHashFactory};
pub use replicated::{ReplicatedConsistentHash, ReplicatedConsistentHashFactory};
pub use segment::SegmentLayout;
pub use stats::OwnershipStatistics;
pub use topology::{TopologyInfo, TopologyLevel};

#[cfg(test)]
mod tests;
