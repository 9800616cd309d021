//! Segment owner selection.
//!
//! For each segment the members are ranked by how close their nearest
//! virtual node is to the segment start. A primary is taken from that
//! ranking, then backups, one pass per diversity level from coarsest to
//! finest. Anything still missing is filled by a last unconstrained pass.
//! The [`OwnerAcceptancePolicy`] decides which candidates each pass accepts.

use std::collections::HashMap;

use strata_types::NodeId;
use tracing::debug;

use crate::capacity::{
    CapacityModel, OWNED_SEGMENTS_ALLOWED_VARIATION, PRIMARY_OWNED_SEGMENTS_ALLOWED_VARIATION,
    max_allowed,
};
use crate::error::PlacementError;
use crate::segment::SegmentLayout;
use crate::stats::OwnershipStatistics;
use crate::topology::{TopologyInfo, TopologyLevel};
use crate::vnode::VirtualNodeRings;

/// Decides whether a candidate may become an owner of the segment being placed.
///
/// Statistics passed in never include the segment being placed.
pub trait OwnerAcceptancePolicy {
    /// Whether `node` may become the primary owner.
    fn accepts_primary(&self, node: &NodeId, stats: &OwnershipStatistics) -> bool;

    /// Levels at which backups are chosen, one pass each, coarsest first.
    fn diversity_levels(&self) -> &[TopologyLevel];

    /// Whether `node` may join `owners` during the pass at `level`.
    ///
    /// `node` is never already in `owners`.
    fn accepts_backup(
        &self,
        node: &NodeId,
        stats: &OwnershipStatistics,
        owners: &[NodeId],
        level: TopologyLevel,
    ) -> bool;
}

/// Per-member segment limits, computed once per assignment.
#[derive(Debug, Clone, Default)]
struct Budgets {
    max_primary: HashMap<NodeId, usize>,
    max_owned: HashMap<NodeId, usize>,
}

impl Budgets {
    fn new(
        nodes: impl IntoIterator<Item = NodeId>,
        expected_primary: impl Fn(&NodeId) -> f64,
        expected_owned: impl Fn(&NodeId) -> f64,
    ) -> Self {
        let mut budgets = Self::default();
        for node in nodes {
            budgets.max_primary.insert(
                node,
                max_allowed(expected_primary(&node), PRIMARY_OWNED_SEGMENTS_ALLOWED_VARIATION),
            );
            budgets.max_owned.insert(
                node,
                max_allowed(expected_owned(&node), OWNED_SEGMENTS_ALLOWED_VARIATION),
            );
        }
        budgets
    }

    fn under_primary(&self, node: &NodeId, stats: &OwnershipStatistics) -> bool {
        self.max_primary
            .get(node)
            .is_some_and(|&max| stats.primary_owned(node) < max)
    }

    fn under_owned(&self, node: &NodeId, stats: &OwnershipStatistics) -> bool {
        self.max_owned
            .get(node)
            .is_some_and(|&max| stats.owned(node) < max)
    }

    fn max_owned(&self, node: &NodeId) -> usize {
        self.max_owned.get(node).copied().unwrap_or(0)
    }

    fn max_primary(&self, node: &NodeId) -> usize {
        self.max_primary.get(node).copied().unwrap_or(0)
    }
}

/// Capacity-proportional budgets with no failure-domain constraints.
#[derive(Debug, Clone)]
pub struct BalancedPolicy {
    budgets: Budgets,
}

impl BalancedPolicy {
    pub fn new(capacity: &CapacityModel, num_copies: usize) -> Self {
        Self {
            budgets: Budgets::new(
                capacity.loaded_members(),
                |node| capacity.expected_segments(node, 1),
                |node| capacity.expected_segments(node, num_copies),
            ),
        }
    }

    /// Most segments `node` may own before it is passed over.
    pub fn max_owned(&self, node: &NodeId) -> usize {
        self.budgets.max_owned(node)
    }

    /// Most segments `node` may primary-own before it is passed over.
    pub fn max_primary(&self, node: &NodeId) -> usize {
        self.budgets.max_primary(node)
    }
}

impl OwnerAcceptancePolicy for BalancedPolicy {
    fn accepts_primary(&self, node: &NodeId, stats: &OwnershipStatistics) -> bool {
        self.budgets.under_primary(node, stats) && self.budgets.under_owned(node, stats)
    }

    fn diversity_levels(&self) -> &[TopologyLevel] {
        &[TopologyLevel::Node]
    }

    fn accepts_backup(
        &self,
        node: &NodeId,
        stats: &OwnershipStatistics,
        _owners: &[NodeId],
        _level: TopologyLevel,
    ) -> bool {
        self.budgets.under_owned(node, stats)
    }
}

/// Budgets that account for site/rack/machine spreading, plus a location
/// check at each diversity level.
#[derive(Debug, Clone)]
pub struct TopologyAwarePolicy {
    topology: TopologyInfo,
    budgets: Budgets,
}

impl TopologyAwarePolicy {
    pub fn new(topology: TopologyInfo, num_segments: usize, num_copies: usize) -> Self {
        let primary = topology.expected_segments(num_segments, 1);
        let owned = topology.expected_segments(num_segments, num_copies);
        let budgets = Budgets::new(
            owned.keys().copied(),
            |node| primary.get(node).copied().unwrap_or(0.0),
            |node| owned.get(node).copied().unwrap_or(0.0),
        );
        Self { topology, budgets }
    }

    pub fn topology(&self) -> &TopologyInfo {
        &self.topology
    }

    /// Most segments `node` may own before it is passed over.
    pub fn max_owned(&self, node: &NodeId) -> usize {
        self.budgets.max_owned(node)
    }

    /// Most segments `node` may primary-own before it is passed over.
    pub fn max_primary(&self, node: &NodeId) -> usize {
        self.budgets.max_primary(node)
    }
}

impl OwnerAcceptancePolicy for TopologyAwarePolicy {
    fn accepts_primary(&self, node: &NodeId, stats: &OwnershipStatistics) -> bool {
        self.budgets.under_primary(node, stats) && self.budgets.under_owned(node, stats)
    }

    fn diversity_levels(&self) -> &[TopologyLevel] {
        &TopologyLevel::ALL
    }

    fn accepts_backup(
        &self,
        node: &NodeId,
        stats: &OwnershipStatistics,
        owners: &[NodeId],
        level: TopologyLevel,
    ) -> bool {
        self.budgets.under_owned(node, stats)
            && !self.topology.location_conflict(node, owners, level)
    }
}

/// Result of one assignment pass.
#[derive(Debug, Clone)]
pub(crate) struct Assignment {
    /// Owner list per segment, primary first.
    pub segment_owners: Vec<Vec<NodeId>>,
    /// Final per-member counts.
    pub stats: OwnershipStatistics,
    /// Owners that were only accepted by the unconstrained last pass.
    pub fallback_owners: usize,
}

/// Assign `num_copies` owners to every segment.
///
/// `tracked` lists every member the statistics should count, including
/// those with no ring. Segments are processed in order; each one sees the
/// counts of all segments before it.
pub(crate) fn assign_owners<P: OwnerAcceptancePolicy + ?Sized>(
    policy: &P,
    rings: &VirtualNodeRings,
    layout: &SegmentLayout,
    tracked: impl IntoIterator<Item = NodeId>,
    num_copies: usize,
) -> Result<Assignment, PlacementError> {
    let num_segments = layout.num_segments();
    let mut stats = OwnershipStatistics::new(tracked);
    let mut segment_owners = Vec::with_capacity(num_segments);
    let mut fallback_owners = 0;

    for segment in 0..num_segments {
        let candidates = rings.candidates(layout.segment_start(segment));
        let mut owners: Vec<NodeId> = Vec::with_capacity(num_copies);

        if let Some(primary) = candidates
            .iter()
            .find(|c| policy.accepts_primary(c, &stats))
        {
            owners.push(*primary);
        }

        for &level in policy.diversity_levels() {
            for candidate in &candidates {
                if owners.len() >= num_copies {
                    break;
                }
                if !owners.contains(candidate)
                    && policy.accepts_backup(candidate, &stats, &owners, level)
                {
                    owners.push(*candidate);
                }
            }
        }

        for candidate in &candidates {
            if owners.len() >= num_copies {
                break;
            }
            if !owners.contains(candidate) {
                owners.push(*candidate);
                fallback_owners += 1;
            }
        }

        stats.record_owners(&owners)?;
        segment_owners.push(owners);
    }

    let expected = num_segments * num_copies;
    let actual = stats.sum_owned();
    if actual != expected {
        return Err(PlacementError::OwnershipMismatch { expected, actual });
    }
    if fallback_owners > 0 {
        debug!(fallback_owners, num_segments, "owners assigned past their budget");
    }

    Ok(Assignment {
        segment_owners,
        stats,
        fallback_owners,
    })
}
