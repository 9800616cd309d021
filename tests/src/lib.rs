//! Shared test harness for strata integration tests.
//!
//! Provides [`TestCluster`]: a named member list plus the consistent hash
//! the cluster currently routes with, driven through the public factory
//! API the way a cluster coordinator would drive it.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use rand::Rng;
use rand::rngs::StdRng;
use strata_placement::{
    CapacityModel, ConsistentHash, ConsistentHashFactory, OwnershipStatistics,
    SyncConsistentHashFactory,
};
use strata_types::{CapacityFactors, HashFunction, Member, NodeId, NodeTopology};

/// Node ID for the member called `name`.
pub fn node_id(name: &str) -> NodeId {
    NodeId::from_data(name.as_bytes())
}

/// Members named `node-0 .. node-{count-1}`.
pub fn named_members(count: usize) -> Vec<Member> {
    (0..count)
        .map(|i| Member::new(node_id(&format!("node-{i}"))))
        .collect()
}

/// Members spread round-robin over `sites` sites, two racks per site and
/// one machine per member.
pub fn spread_members(count: usize, sites: usize) -> Vec<Member> {
    (0..count)
        .map(|i| {
            let site = i % sites;
            let rack = (i / sites) % 2;
            Member::with_topology(
                node_id(&format!("node-{i}")),
                NodeTopology::new(
                    &format!("site-{site}"),
                    &format!("site-{site}-rack-{rack}"),
                    &format!("host-{i}"),
                ),
            )
        })
        .collect()
}

/// Capacity factors drawn from a few typical ratios.
pub fn random_factors(rng: &mut StdRng, members: &[Member]) -> CapacityFactors {
    const RATIOS: [f32; 4] = [0.5, 1.0, 2.0, 3.0];
    members
        .iter()
        .map(|m| (m.node_id, RATIOS[rng.random_range(0..RATIOS.len())]))
        .collect()
}

// =========================================================================
// Invariant checks
// =========================================================================

/// Every segment has `min(num_owners, loaded)` distinct owners, all of them
/// members with non-zero capacity.
pub fn assert_complete(ch: &ConsistentHash) {
    let factors = ch.capacity_factors();
    let loaded: HashSet<NodeId> = ch
        .member_ids()
        .into_iter()
        .filter(|id| factors.get(id).copied().unwrap_or(1.0) > 0.0)
        .collect();
    let expected = ch.num_owners().min(loaded.len());

    for segment in 0..ch.num_segments() {
        let owners = ch.locate_owners(segment);
        assert_eq!(
            owners.len(),
            expected,
            "segment {segment} has {} owners",
            owners.len()
        );
        let distinct: HashSet<&NodeId> = owners.iter().collect();
        assert_eq!(distinct.len(), owners.len(), "segment {segment} repeats an owner");
        for owner in owners {
            assert!(loaded.contains(owner), "segment {segment} owned by {owner}");
        }
    }
}

/// Owned-segment counts per member.
pub fn owned_counts(ch: &ConsistentHash) -> BTreeMap<NodeId, usize> {
    let stats = OwnershipStatistics::from_hash(ch, ch.member_ids());
    ch.member_ids()
        .into_iter()
        .map(|id| (id, stats.owned(&id)))
        .collect()
}

/// Primary-owned counts per member.
pub fn primary_counts(ch: &ConsistentHash) -> BTreeMap<NodeId, usize> {
    let stats = OwnershipStatistics::from_hash(ch, ch.member_ids());
    ch.member_ids()
        .into_iter()
        .map(|id| (id, stats.primary_owned(&id)))
        .collect()
}

/// Segments whose owner list differs between `a` and `b`.
pub fn changed_segments(a: &ConsistentHash, b: &ConsistentHash) -> Vec<usize> {
    (0..a.num_segments())
        .filter(|&s| a.locate_owners(s) != b.locate_owners(s))
        .collect()
}

// =========================================================================
// Test cluster
// =========================================================================

/// A cluster whose membership changes go through the factory.
pub struct TestCluster {
    factory: SyncConsistentHashFactory,
    members: Vec<Member>,
    factors: Option<CapacityFactors>,
    ch: Arc<ConsistentHash>,
}

impl TestCluster {
    /// `count` equal-capacity members placed by the balanced factory.
    pub fn new(count: usize, num_segments: usize, num_owners: usize) -> Self {
        Self::build(
            SyncConsistentHashFactory::balanced(),
            named_members(count),
            None,
            num_segments,
            num_owners,
        )
    }

    /// Explicit members, factors and factory.
    pub fn build(
        factory: SyncConsistentHashFactory,
        members: Vec<Member>,
        factors: Option<CapacityFactors>,
        num_segments: usize,
        num_owners: usize,
    ) -> Self {
        let ch = factory
            .create(
                HashFunction::Blake3,
                num_owners,
                num_segments,
                &members,
                factors.as_ref(),
            )
            .unwrap();
        Self {
            factory,
            members,
            factors,
            ch,
        }
    }

    pub fn ch(&self) -> &Arc<ConsistentHash> {
        &self.ch
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn member_ids(&self) -> Vec<NodeId> {
        self.members.iter().map(|m| m.node_id).collect()
    }

    pub fn factory(&self) -> SyncConsistentHashFactory {
        self.factory
    }

    /// Remove `node` and install the updated hash. Returns the previous one.
    pub fn leave(&mut self, node: &NodeId) -> Arc<ConsistentHash> {
        self.members.retain(|m| m.node_id != *node);
        if let Some(factors) = &mut self.factors {
            factors.remove(node);
        }
        self.update()
    }

    /// Add `member` and install the updated hash. Returns the previous one.
    pub fn join(&mut self, member: Member, factor: Option<f32>) -> Arc<ConsistentHash> {
        if let Some(factor) = factor {
            let mut factors = self.factors.take().unwrap_or_else(|| {
                self.members.iter().map(|m| (m.node_id, 1.0)).collect()
            });
            factors.insert(member.node_id, factor);
            self.factors = Some(factors);
        } else if let Some(factors) = &mut self.factors {
            factors.insert(member.node_id, 1.0);
        }
        self.members.push(member);
        self.update()
    }

    /// Rebalance and install the result. Returns the previous hash.
    pub fn rebalance(&mut self) -> Arc<ConsistentHash> {
        let next = self.factory.rebalance(&self.ch).unwrap();
        std::mem::replace(&mut self.ch, next)
    }

    fn update(&mut self) -> Arc<ConsistentHash> {
        let next = self
            .factory
            .update_members(&self.ch, &self.members, self.factors.as_ref())
            .unwrap();
        std::mem::replace(&mut self.ch, next)
    }

    /// Expected owned segments of `node` for the current membership.
    pub fn expected_owned(&self, node: &NodeId) -> f64 {
        let model = CapacityModel::new(
            &self.members,
            self.factors.as_ref(),
            self.ch.num_segments(),
        )
        .unwrap();
        let copies = model.actual_num_owners(self.ch.num_owners());
        model.expected_segments(node, copies)
    }
}
