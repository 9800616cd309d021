//! Factories that build and evolve consistent hashes.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use strata_types::{CapacityFactors, HashFunction, Member, NodeId, PlacementStrategy};
use tracing::{debug, info};

use crate::assign::{BalancedPolicy, TopologyAwarePolicy, assign_owners};
use crate::capacity::CapacityModel;
use crate::consistent_hash::ConsistentHash;
use crate::error::PlacementError;
use crate::segment::SegmentLayout;
use crate::topology::TopologyInfo;
use crate::vnode::{VirtualNodeRings, virtual_nodes_per_member};

/// Builds consistent hashes and derives new ones on topology changes.
///
/// Implementations hold no mutable state, so one factory can serve any
/// number of caches from any thread. Operations that change nothing return
/// the input `Arc` itself.
pub trait ConsistentHashFactory {
    type Output;

    /// Compute ownership from scratch.
    fn create(
        &self,
        hash_function: HashFunction,
        num_owners: usize,
        num_segments: usize,
        members: &[Member],
        capacity_factors: Option<&CapacityFactors>,
    ) -> Result<Arc<Self::Output>, PlacementError>;

    /// Drop members that left, moving as few segments as possible.
    fn update_members(
        &self,
        base: &Arc<Self::Output>,
        new_members: &[Member],
        capacity_factors: Option<&CapacityFactors>,
    ) -> Result<Arc<Self::Output>, PlacementError>;

    /// Recompute ownership for the current members.
    fn rebalance(&self, base: &Arc<Self::Output>) -> Result<Arc<Self::Output>, PlacementError>;

    /// Merge two hashes computed on either side of a partition.
    fn union(
        &self,
        ch1: &Arc<Self::Output>,
        ch2: &Arc<Self::Output>,
    ) -> Result<Arc<Self::Output>, PlacementError>;
}

/// Keep the first occurrence of each member.
pub(crate) fn dedup_members(members: &[Member]) -> Vec<Member> {
    let mut seen = HashSet::with_capacity(members.len());
    members
        .iter()
        .filter(|m| seen.insert(m.node_id))
        .cloned()
        .collect()
}

/// Whether two member lists hold the same members, ignoring order.
pub(crate) fn same_members(a: &[Member], b: &[Member]) -> bool {
    let a: BTreeSet<&Member> = a.iter().collect();
    let b: BTreeSet<&Member> = b.iter().collect();
    a == b
}

/// Deterministic placement that depends only on the current members.
///
/// Two nodes that call [`create`](ConsistentHashFactory::create) with the
/// same members, capacity factors and parameters get identical owner tables,
/// however the membership got there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncConsistentHashFactory {
    topology_aware: bool,
}

impl SyncConsistentHashFactory {
    /// Capacity-proportional placement.
    pub fn balanced() -> Self {
        Self {
            topology_aware: false,
        }
    }

    /// Capacity-proportional placement that also spreads each segment's
    /// owners over sites, racks and machines.
    pub fn topology_aware() -> Self {
        Self {
            topology_aware: true,
        }
    }

    pub fn strategy(&self) -> PlacementStrategy {
        if self.topology_aware {
            PlacementStrategy::TopologyAware
        } else {
            PlacementStrategy::Balanced
        }
    }

    fn build(
        &self,
        hash_function: HashFunction,
        num_owners: usize,
        num_segments: usize,
        members: &[Member],
        capacity_factors: Option<&CapacityFactors>,
    ) -> Result<ConsistentHash, PlacementError> {
        if num_owners == 0 {
            return Err(PlacementError::InvalidParameters(
                "num_owners must be at least 1".to_string(),
            ));
        }
        let layout = SegmentLayout::new(num_segments)?;
        let members = dedup_members(members);
        let model = CapacityModel::new(&members, capacity_factors, num_segments)?;

        let num_copies = model.actual_num_owners(num_owners);
        if num_copies < num_owners {
            debug!(
                num_owners,
                loaded_members = num_copies,
                "fewer members with capacity than requested owners"
            );
        }

        let rings = VirtualNodeRings::build(
            model.loaded_members(),
            hash_function,
            virtual_nodes_per_member(num_segments),
        );
        let tracked = model.sorted_members().iter().copied();
        let assignment = if self.topology_aware {
            let topology = TopologyInfo::new(&members, &model);
            debug!(
                sites = topology.num_sites(),
                racks = topology.num_racks(),
                machines = topology.num_machines(),
                "placing with topology"
            );
            let policy = TopologyAwarePolicy::new(topology, num_segments, num_copies);
            assign_owners(&policy, &rings, &layout, tracked, num_copies)?
        } else {
            let policy = BalancedPolicy::new(&model, num_copies);
            assign_owners(&policy, &rings, &layout, tracked, num_copies)?
        };

        debug!(
            num_segments,
            num_owners = num_copies,
            members = members.len(),
            fallback_owners = assignment.fallback_owners,
            strategy = ?self.strategy(),
            stats = %assignment.stats,
            "created consistent hash"
        );

        ConsistentHash::new(
            hash_function,
            num_owners,
            members,
            capacity_factors.cloned(),
            assignment.segment_owners,
        )
    }
}

impl ConsistentHashFactory for SyncConsistentHashFactory {
    type Output = ConsistentHash;

    fn create(
        &self,
        hash_function: HashFunction,
        num_owners: usize,
        num_segments: usize,
        members: &[Member],
        capacity_factors: Option<&CapacityFactors>,
    ) -> Result<Arc<ConsistentHash>, PlacementError> {
        self.build(
            hash_function,
            num_owners,
            num_segments,
            members,
            capacity_factors,
        )
        .map(Arc::new)
    }

    fn update_members(
        &self,
        base: &Arc<ConsistentHash>,
        new_members: &[Member],
        capacity_factors: Option<&CapacityFactors>,
    ) -> Result<Arc<ConsistentHash>, PlacementError> {
        if same_members(base.members(), new_members)
            && base.explicit_capacity_factors() == capacity_factors
        {
            return Ok(Arc::clone(base));
        }

        let new_members = dedup_members(new_members);
        let num_segments = base.num_segments();
        let model = CapacityModel::new(&new_members, capacity_factors, num_segments)?;
        let target = model.actual_num_owners(base.num_owners());
        let loaded: HashSet<NodeId> = model.loaded_members().collect();

        let mut fresh: Option<ConsistentHash> = None;
        let mut replaced = 0usize;
        let mut segment_owners = Vec::with_capacity(num_segments);
        for segment in 0..num_segments {
            let mut owners: Vec<NodeId> = base
                .locate_owners(segment)
                .iter()
                .copied()
                .filter(|owner| loaded.contains(owner))
                .collect();

            if owners.len() < target {
                if fresh.is_none() {
                    fresh = Some(self.build(
                        base.hash_function(),
                        base.num_owners(),
                        num_segments,
                        &new_members,
                        capacity_factors,
                    )?);
                }
                if let Some(fresh) = &fresh {
                    for owner in fresh.locate_owners(segment) {
                        if owners.len() >= target {
                            break;
                        }
                        if !owners.contains(owner) {
                            owners.push(*owner);
                        }
                    }
                }
                replaced += 1;
            }
            segment_owners.push(owners);
        }

        let left = base
            .members()
            .iter()
            .filter(|m| !new_members.iter().any(|n| n.node_id == m.node_id))
            .count();
        info!(
            members = new_members.len(),
            left,
            segments_changed = replaced,
            "updated consistent hash members"
        );

        ConsistentHash::new(
            base.hash_function(),
            base.num_owners(),
            new_members,
            capacity_factors.cloned(),
            segment_owners,
        )
        .map(Arc::new)
    }

    fn rebalance(&self, base: &Arc<ConsistentHash>) -> Result<Arc<ConsistentHash>, PlacementError> {
        let rebalanced = self.build(
            base.hash_function(),
            base.num_owners(),
            base.num_segments(),
            base.members(),
            base.explicit_capacity_factors(),
        )?;
        if rebalanced == **base {
            debug!("rebalance left ownership unchanged");
            return Ok(Arc::clone(base));
        }
        Ok(Arc::new(rebalanced))
    }

    fn union(
        &self,
        ch1: &Arc<ConsistentHash>,
        ch2: &Arc<ConsistentHash>,
    ) -> Result<Arc<ConsistentHash>, PlacementError> {
        let merged = ch1.union(ch2)?;
        info!(
            members = merged.members().len(),
            num_segments = merged.num_segments(),
            "merged consistent hashes"
        );
        Ok(Arc::new(merged))
    }
}
