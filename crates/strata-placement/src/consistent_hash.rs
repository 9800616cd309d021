//! The immutable segment → owners table.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use strata_types::{CapacityFactors, HashFunction, Member, NodeId};

use crate::error::PlacementError;
use crate::segment::SegmentLayout;

/// A segment gaining a new owner between two consistent hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// The segment that must be copied.
    pub segment: usize,
    /// An old owner that is still a member and can serve the data, if any.
    pub from: Option<NodeId>,
    /// The member that gains ownership.
    pub to: NodeId,
}

/// Ownership of every segment of a partitioned cache.
///
/// Built by a [`ConsistentHashFactory`](crate::ConsistentHashFactory) and
/// never modified afterwards; a topology change produces a new value.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsistentHash {
    hash_function: HashFunction,
    num_owners: usize,
    layout: SegmentLayout,
    members: Vec<Member>,
    capacity_factors: Option<CapacityFactors>,
    segment_owners: Vec<Vec<NodeId>>,
}

impl ConsistentHash {
    /// Assemble a consistent hash from an explicit owner table.
    ///
    /// Every segment needs at least one owner, owners must be members, and
    /// no member may appear twice in the same segment.
    pub fn new(
        hash_function: HashFunction,
        num_owners: usize,
        members: Vec<Member>,
        capacity_factors: Option<CapacityFactors>,
        segment_owners: Vec<Vec<NodeId>>,
    ) -> Result<Self, PlacementError> {
        if num_owners == 0 {
            return Err(PlacementError::InvalidParameters(
                "num_owners must be at least 1".to_string(),
            ));
        }
        let layout = SegmentLayout::new(segment_owners.len())?;

        let known: HashSet<NodeId> = members.iter().map(|m| m.node_id).collect();
        if known.len() != members.len() {
            return Err(PlacementError::InvalidParameters(
                "member list contains duplicates".to_string(),
            ));
        }
        for (segment, owners) in segment_owners.iter().enumerate() {
            if owners.is_empty() {
                return Err(PlacementError::InvalidParameters(format!(
                    "segment {segment} has no owners"
                )));
            }
            let mut seen = HashSet::with_capacity(owners.len());
            for owner in owners {
                if !known.contains(owner) {
                    return Err(PlacementError::UnknownMember(*owner));
                }
                if !seen.insert(owner) {
                    return Err(PlacementError::InvalidParameters(format!(
                        "segment {segment} lists {owner} twice"
                    )));
                }
            }
        }

        Ok(Self {
            hash_function,
            num_owners,
            layout,
            members,
            capacity_factors,
            segment_owners,
        })
    }

    pub fn hash_function(&self) -> HashFunction {
        self.hash_function
    }

    /// Requested replication factor; segments may have fewer owners when
    /// there are not enough members.
    pub fn num_owners(&self) -> usize {
        self.num_owners
    }

    pub fn num_segments(&self) -> usize {
        self.layout.num_segments()
    }

    pub fn segment_size(&self) -> u64 {
        self.layout.segment_size()
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn member_ids(&self) -> Vec<NodeId> {
        self.members.iter().map(|m| m.node_id).collect()
    }

    pub fn contains_member(&self, node: &NodeId) -> bool {
        self.members.iter().any(|m| m.node_id == *node)
    }

    /// Capacity factor of every member; 1.0 where none were given.
    pub fn capacity_factors(&self) -> CapacityFactors {
        self.members
            .iter()
            .map(|m| {
                let factor = self
                    .capacity_factors
                    .as_ref()
                    .and_then(|f| f.get(&m.node_id).copied())
                    .unwrap_or(1.0);
                (m.node_id, factor)
            })
            .collect()
    }

    /// The capacity factors this hash was built with, if any were given.
    pub fn explicit_capacity_factors(&self) -> Option<&CapacityFactors> {
        self.capacity_factors.as_ref()
    }

    /// Owners of `segment`, primary first.
    ///
    /// # Panics
    ///
    /// Panics if `segment >= num_segments()`.
    pub fn locate_owners(&self, segment: usize) -> &[NodeId] {
        &self.segment_owners[segment]
    }

    /// Primary owner of `segment`.
    ///
    /// # Panics
    ///
    /// Panics if `segment >= num_segments()`.
    pub fn locate_primary(&self, segment: usize) -> NodeId {
        self.segment_owners[segment][0]
    }

    /// Segment containing an already computed key hash.
    pub fn segment_for_hash(&self, hash: i32) -> usize {
        self.layout.segment_for((hash & i32::MAX) as u32)
    }

    /// Segment a key falls into under this hash's hash function.
    pub fn segment_for_key(&self, key: &[u8]) -> usize {
        self.layout
            .segment_for(self.hash_function.normalized_bytes(key))
    }

    pub fn locate_owners_for_key(&self, key: &[u8]) -> &[NodeId] {
        self.locate_owners(self.segment_for_key(key))
    }

    pub fn locate_primary_for_key(&self, key: &[u8]) -> NodeId {
        self.locate_primary(self.segment_for_key(key))
    }

    /// Segments `node` owns, as primary or backup.
    pub fn segments_for_owner(&self, node: &NodeId) -> BTreeSet<usize> {
        self.segment_owners
            .iter()
            .enumerate()
            .filter(|(_, owners)| owners.contains(node))
            .map(|(segment, _)| segment)
            .collect()
    }

    /// Segments `node` is the primary owner of.
    pub fn primary_segments_for_owner(&self, node: &NodeId) -> BTreeSet<usize> {
        self.segment_owners
            .iter()
            .enumerate()
            .filter(|(_, owners)| owners.first() == Some(node))
            .map(|(segment, _)| segment)
            .collect()
    }

    pub fn is_segment_owner(&self, node: &NodeId, segment: usize) -> bool {
        self.segment_owners
            .get(segment)
            .is_some_and(|owners| owners.contains(node))
    }

    /// Merge with `other`, as after a partition heals.
    ///
    /// Members are this hash's followed by `other`'s new ones. Each segment
    /// keeps this hash's owners, primary first, then `other`'s owners not
    /// already present. Capacity factors from this hash win.
    pub fn union(&self, other: &ConsistentHash) -> Result<Self, PlacementError> {
        self.check_compatible(other)?;

        let mut members = self.members.clone();
        for member in &other.members {
            if !self.contains_member(&member.node_id) {
                members.push(member.clone());
            }
        }

        let capacity_factors = match (&self.capacity_factors, &other.capacity_factors) {
            (None, None) => None,
            _ => {
                let mut merged = other.capacity_factors();
                merged.extend(self.capacity_factors());
                Some(merged)
            }
        };

        let segment_owners = self
            .segment_owners
            .iter()
            .zip(&other.segment_owners)
            .map(|(mine, theirs)| {
                let mut owners = mine.clone();
                for owner in theirs {
                    if !owners.contains(owner) {
                        owners.push(*owner);
                    }
                }
                owners
            })
            .collect();

        Ok(Self {
            hash_function: self.hash_function,
            num_owners: self.num_owners,
            layout: self.layout,
            members,
            capacity_factors,
            segment_owners,
        })
    }

    /// Ownership gained going from `old` to `new`.
    ///
    /// One entry per segment and new owner that did not own the segment in
    /// `old`. The source is the first old owner still a member of `new`.
    pub fn diff(old: &ConsistentHash, new: &ConsistentHash) -> Result<Vec<Migration>, PlacementError> {
        if old.num_segments() != new.num_segments() {
            return Err(PlacementError::IncompatibleHash(format!(
                "segment counts differ: {} vs {}",
                old.num_segments(),
                new.num_segments()
            )));
        }

        let mut migrations = Vec::new();
        for (segment, (old_owners, new_owners)) in
            old.segment_owners.iter().zip(&new.segment_owners).enumerate()
        {
            let from = old_owners
                .iter()
                .find(|owner| new.contains_member(owner))
                .copied();
            for to in new_owners {
                if !old_owners.contains(to) {
                    migrations.push(Migration {
                        segment,
                        from,
                        to: *to,
                    });
                }
            }
        }
        Ok(migrations)
    }

    fn check_compatible(&self, other: &ConsistentHash) -> Result<(), PlacementError> {
        if self.hash_function != other.hash_function {
            return Err(PlacementError::IncompatibleHash(format!(
                "hash functions differ: {:?} vs {:?}",
                self.hash_function, other.hash_function
            )));
        }
        if self.num_segments() != other.num_segments() {
            return Err(PlacementError::IncompatibleHash(format!(
                "segment counts differ: {} vs {}",
                self.num_segments(),
                other.num_segments()
            )));
        }
        Ok(())
    }
}

/// Routing table: a header line, then one line per segment.
impl fmt::Display for ConsistentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ConsistentHash{{hash_function: {:?}, num_owners: {}, num_segments: {}, members: {}}}",
            self.hash_function,
            self.num_owners,
            self.num_segments(),
            self.members.len()
        )?;
        for (segment, owners) in self.segment_owners.iter().enumerate() {
            write!(f, "{segment}:")?;
            for owner in owners {
                write!(f, " {owner}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
