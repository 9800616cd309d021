//! Per-member rings of virtual nodes.
//!
//! Every member with positive capacity gets the same number of hash points
//! on the circle. Rings are kept per member rather than merged, so finding
//! each member's closest point to a segment start is one binary search per
//! member.

use std::collections::BTreeMap;

use strata_types::{HashFunction, NodeId};

use crate::segment::circle_distance;

/// Upper bound on virtual nodes per member.
pub const MAX_VIRTUAL_NODES_PER_MEMBER: usize = 100;

/// Virtual nodes generated for each member: `min(num_segments, 100)`.
pub fn virtual_nodes_per_member(num_segments: usize) -> usize {
    num_segments.min(MAX_VIRTUAL_NODES_PER_MEMBER)
}

/// A hash point owned by a member.
///
/// Ordered by hash, then by owner. Searching a ring for a position finds the
/// first virtual node at or after it, the same as probing with an owner that
/// sorts before every real member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualNode {
    /// Normalized position in `[0, 2^31)`.
    pub hash: u32,
    pub owner: NodeId,
}

/// Sorted virtual-node rings keyed by member.
#[derive(Debug, Clone, Default)]
pub struct VirtualNodeRings {
    rings: BTreeMap<NodeId, Vec<VirtualNode>>,
}

impl VirtualNodeRings {
    /// Generate `per_member` points for each of `members`.
    ///
    /// Point `i` of a member sits at `normalize(hash(member_hash + i))`.
    /// Callers pass only members with positive capacity.
    pub fn build(
        members: impl IntoIterator<Item = NodeId>,
        hash_function: HashFunction,
        per_member: usize,
    ) -> Self {
        let mut rings = BTreeMap::new();
        for owner in members {
            let seed = owner.member_hash();
            let mut ring: Vec<VirtualNode> = (0..per_member)
                .map(|i| VirtualNode {
                    hash: hash_function.normalized(seed.wrapping_add(i as i32)),
                    owner,
                })
                .collect();
            ring.sort_unstable();
            rings.insert(owner, ring);
        }
        Self { rings }
    }

    /// Number of members with a ring.
    pub fn len(&self) -> usize {
        self.rings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rings.is_empty()
    }

    /// Sorted ring of `node`, if it has one.
    pub fn ring(&self, node: &NodeId) -> Option<&[VirtualNode]> {
        self.rings.get(node).map(Vec::as_slice)
    }

    /// Each member's virtual node closest to `position`.
    pub fn closest(&self, position: u64) -> Vec<VirtualNode> {
        self.rings
            .values()
            .filter_map(|ring| closest_virtual_node(ring, position))
            .collect()
    }

    /// Members ordered by how close their nearest virtual node is to
    /// `position`, ties broken by member ID.
    pub fn candidates(&self, position: u64) -> Vec<NodeId> {
        let mut closest: Vec<(u64, NodeId)> = self
            .closest(position)
            .into_iter()
            .map(|vn| (circle_distance(vn.hash as u64, position), vn.owner))
            .collect();
        closest.sort_unstable();
        closest.into_iter().map(|(_, owner)| owner).collect()
    }
}

/// Closest point of a sorted ring to `position`, looking both ways around the circle.
///
/// When the neighbours before and after are equally far, the one after wins.
pub fn closest_virtual_node(ring: &[VirtualNode], position: u64) -> Option<VirtualNode> {
    if ring.is_empty() {
        return None;
    }
    let insertion = ring.partition_point(|vn| (vn.hash as u64) < position);
    let before = ring[if insertion > 0 { insertion - 1 } else { ring.len() - 1 }];
    let after = ring[if insertion < ring.len() { insertion } else { 0 }];
    if circle_distance(position, before.hash as u64) < circle_distance(position, after.hash as u64) {
        Some(before)
    } else {
        Some(after)
    }
}
