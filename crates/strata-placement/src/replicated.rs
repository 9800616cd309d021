//! Fully replicated placement: every member owns every segment.
//!
//! Only the primary owner of each segment is chosen, using a single-owner
//! balanced placement so that write coordination is spread evenly.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use strata_types::{CapacityFactors, HashFunction, Member, NodeId};
use tracing::info;

use crate::consistent_hash::ConsistentHash;
use crate::error::PlacementError;
use crate::factory::{
    ConsistentHashFactory, SyncConsistentHashFactory, dedup_members, same_members,
};
use crate::segment::SegmentLayout;

/// Segment → primary table for a replicated cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicatedConsistentHash {
    hash_function: HashFunction,
    layout: SegmentLayout,
    members: Vec<Member>,
    primary_owners: Vec<NodeId>,
}

impl ReplicatedConsistentHash {
    /// Assemble from an explicit primary per segment.
    pub fn new(
        hash_function: HashFunction,
        members: Vec<Member>,
        primary_owners: Vec<NodeId>,
    ) -> Result<Self, PlacementError> {
        let layout = SegmentLayout::new(primary_owners.len())?;
        let known: HashSet<NodeId> = members.iter().map(|m| m.node_id).collect();
        if known.len() != members.len() {
            return Err(PlacementError::InvalidParameters(
                "member list contains duplicates".to_string(),
            ));
        }
        if let Some(unknown) = primary_owners.iter().find(|p| !known.contains(*p)) {
            return Err(PlacementError::UnknownMember(*unknown));
        }
        Ok(Self {
            hash_function,
            layout,
            members,
            primary_owners,
        })
    }

    pub fn hash_function(&self) -> HashFunction {
        self.hash_function
    }

    /// Every member holds a copy.
    pub fn num_owners(&self) -> usize {
        self.members.len()
    }

    pub fn num_segments(&self) -> usize {
        self.layout.num_segments()
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn member_ids(&self) -> Vec<NodeId> {
        self.members.iter().map(|m| m.node_id).collect()
    }

    /// All members, the segment's primary first and the rest in member order.
    pub fn locate_owners(&self, segment: usize) -> Vec<NodeId> {
        let primary = self.primary_owners[segment];
        std::iter::once(primary)
            .chain(
                self.members
                    .iter()
                    .map(|m| m.node_id)
                    .filter(|n| *n != primary),
            )
            .collect()
    }

    /// # Panics
    ///
    /// Panics if `segment >= num_segments()`.
    pub fn locate_primary(&self, segment: usize) -> NodeId {
        self.primary_owners[segment]
    }

    pub fn segment_for_key(&self, key: &[u8]) -> usize {
        self.layout
            .segment_for(self.hash_function.normalized_bytes(key))
    }

    pub fn locate_primary_for_key(&self, key: &[u8]) -> NodeId {
        self.locate_primary(self.segment_for_key(key))
    }

    pub fn primary_segments_for_owner(&self, node: &NodeId) -> BTreeSet<usize> {
        self.primary_owners
            .iter()
            .enumerate()
            .filter(|(_, p)| *p == node)
            .map(|(segment, _)| segment)
            .collect()
    }

    pub fn is_segment_owner(&self, node: &NodeId, segment: usize) -> bool {
        segment < self.num_segments() && self.members.iter().any(|m| m.node_id == *node)
    }

    fn index_of(members: &[Member], node: &NodeId) -> Option<usize> {
        members.iter().position(|m| m.node_id == *node)
    }
}

impl fmt::Display for ReplicatedConsistentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ReplicatedConsistentHash{{hash_function: {:?}, num_segments: {}, members: {}}}",
            self.hash_function,
            self.num_segments(),
            self.members.len()
        )?;
        for (segment, primary) in self.primary_owners.iter().enumerate() {
            writeln!(f, "{segment}: {primary}")?;
        }
        Ok(())
    }
}

/// Builds [`ReplicatedConsistentHash`]es. Capacity factors and the requested
/// owner count are ignored: every member owns everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicatedConsistentHashFactory {
    primaries: SyncConsistentHashFactory,
}

impl ReplicatedConsistentHashFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Balanced single-owner placement for the primaries.
    fn primary_placement(
        &self,
        hash_function: HashFunction,
        num_segments: usize,
        members: &[Member],
    ) -> Result<Arc<ConsistentHash>, PlacementError> {
        self.primaries
            .create(hash_function, 1, num_segments, members, None)
    }
}

impl ConsistentHashFactory for ReplicatedConsistentHashFactory {
    type Output = ReplicatedConsistentHash;

    fn create(
        &self,
        hash_function: HashFunction,
        _num_owners: usize,
        num_segments: usize,
        members: &[Member],
        _capacity_factors: Option<&CapacityFactors>,
    ) -> Result<Arc<ReplicatedConsistentHash>, PlacementError> {
        let members = dedup_members(members);
        let Some(first) = members.first().map(|m| m.node_id) else {
            return Err(PlacementError::NoMembers);
        };
        let primary_owners = if num_segments == 1 {
            vec![first]
        } else {
            let placement = self.primary_placement(hash_function, num_segments, &members)?;
            (0..num_segments)
                .map(|segment| placement.locate_primary(segment))
                .collect()
        };
        ReplicatedConsistentHash::new(hash_function, members, primary_owners).map(Arc::new)
    }

    fn update_members(
        &self,
        base: &Arc<ReplicatedConsistentHash>,
        new_members: &[Member],
        _capacity_factors: Option<&CapacityFactors>,
    ) -> Result<Arc<ReplicatedConsistentHash>, PlacementError> {
        if same_members(base.members(), new_members) {
            return Ok(Arc::clone(base));
        }
        let new_members = dedup_members(new_members);
        let Some(first) = new_members.first().map(|m| m.node_id) else {
            return Err(PlacementError::NoMembers);
        };

        let num_segments = base.num_segments();
        let primary_owners = if num_segments == 1 {
            vec![first]
        } else {
            let mut fresh: Option<Arc<ConsistentHash>> = None;
            let mut primaries = Vec::with_capacity(num_segments);
            for segment in 0..num_segments {
                let current = base.locate_primary(segment);
                if ReplicatedConsistentHash::index_of(&new_members, &current).is_some() {
                    primaries.push(current);
                    continue;
                }
                if fresh.is_none() {
                    fresh = Some(self.primary_placement(
                        base.hash_function(),
                        num_segments,
                        &new_members,
                    )?);
                }
                if let Some(fresh) = &fresh {
                    primaries.push(fresh.locate_primary(segment));
                }
            }
            primaries
        };

        info!(
            members = new_members.len(),
            num_segments, "updated replicated consistent hash members"
        );
        ReplicatedConsistentHash::new(base.hash_function(), new_members, primary_owners)
            .map(Arc::new)
    }

    fn rebalance(
        &self,
        base: &Arc<ReplicatedConsistentHash>,
    ) -> Result<Arc<ReplicatedConsistentHash>, PlacementError> {
        let rebalanced = self.create(
            base.hash_function(),
            base.num_owners(),
            base.num_segments(),
            base.members(),
            None,
        )?;
        if *rebalanced == **base {
            return Ok(Arc::clone(base));
        }
        Ok(rebalanced)
    }

    fn union(
        &self,
        ch1: &Arc<ReplicatedConsistentHash>,
        ch2: &Arc<ReplicatedConsistentHash>,
    ) -> Result<Arc<ReplicatedConsistentHash>, PlacementError> {
        if ch1.hash_function() != ch2.hash_function() {
            return Err(PlacementError::IncompatibleHash(format!(
                "hash functions differ: {:?} vs {:?}",
                ch1.hash_function(),
                ch2.hash_function()
            )));
        }
        if ch1.num_segments() != ch2.num_segments() {
            return Err(PlacementError::IncompatibleHash(format!(
                "segment counts differ: {} vs {}",
                ch1.num_segments(),
                ch2.num_segments()
            )));
        }

        let mut members = ch1.members().to_vec();
        for member in ch2.members() {
            if ReplicatedConsistentHash::index_of(&members, &member.node_id).is_none() {
                members.push(member.clone());
            }
        }
        info!(members = members.len(), "merged replicated consistent hashes");
        ReplicatedConsistentHash::new(ch1.hash_function(), members, ch1.primary_owners.clone())
            .map(Arc::new)
    }
}
