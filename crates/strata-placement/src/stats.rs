//! Per-member segment counters.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;

use strata_types::NodeId;

use crate::consistent_hash::ConsistentHash;
use crate::error::PlacementError;

/// Counts how many segments each member owns and primary-owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipStatistics {
    nodes: Vec<NodeId>,
    index: HashMap<NodeId, usize>,
    owned: Vec<usize>,
    primary_owned: Vec<usize>,
}

impl OwnershipStatistics {
    /// Zeroed counters for `nodes`.
    pub fn new(nodes: impl IntoIterator<Item = NodeId>) -> Self {
        let mut tracked = Vec::new();
        let mut index = HashMap::new();
        for node in nodes {
            if let Entry::Vacant(e) = index.entry(node) {
                e.insert(tracked.len());
                tracked.push(node);
            }
        }
        let len = tracked.len();
        Self {
            nodes: tracked,
            index,
            owned: vec![0; len],
            primary_owned: vec![0; len],
        }
    }

    /// Count the ownership of a finished consistent hash.
    ///
    /// Owners outside `nodes` are skipped, so statistics can be taken for a
    /// subset of the members (e.g. the survivors of a leave).
    pub fn from_hash(ch: &ConsistentHash, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        let mut stats = Self::new(nodes);
        for segment in 0..ch.num_segments() {
            for (i, owner) in ch.locate_owners(segment).iter().enumerate() {
                if let Some(&idx) = stats.index.get(owner) {
                    if i == 0 {
                        stats.primary_owned[idx] += 1;
                    }
                    stats.owned[idx] += 1;
                }
            }
        }
        stats
    }

    fn slot(&self, node: &NodeId) -> Result<usize, PlacementError> {
        self.index
            .get(node)
            .copied()
            .ok_or(PlacementError::UnknownMember(*node))
    }

    pub fn increment_owned(&mut self, node: &NodeId) -> Result<(), PlacementError> {
        let i = self.slot(node)?;
        self.owned[i] += 1;
        Ok(())
    }

    pub fn increment_primary_owned(&mut self, node: &NodeId) -> Result<(), PlacementError> {
        let i = self.slot(node)?;
        self.primary_owned[i] += 1;
        Ok(())
    }

    pub fn decrement_owned(&mut self, node: &NodeId) -> Result<(), PlacementError> {
        let i = self.slot(node)?;
        self.owned[i] = self.owned[i].saturating_sub(1);
        Ok(())
    }

    pub fn decrement_primary_owned(&mut self, node: &NodeId) -> Result<(), PlacementError> {
        let i = self.slot(node)?;
        self.primary_owned[i] = self.primary_owned[i].saturating_sub(1);
        Ok(())
    }

    /// Record a finished owner list: the first entry is the primary.
    pub fn record_owners(&mut self, owners: &[NodeId]) -> Result<(), PlacementError> {
        if let Some(primary) = owners.first() {
            self.increment_primary_owned(primary)?;
        }
        for owner in owners {
            self.increment_owned(owner)?;
        }
        Ok(())
    }

    /// Segments owned by `node`; 0 if it is not tracked.
    pub fn owned(&self, node: &NodeId) -> usize {
        self.index.get(node).map_or(0, |&i| self.owned[i])
    }

    /// Segments primary-owned by `node`; 0 if it is not tracked.
    pub fn primary_owned(&self, node: &NodeId) -> usize {
        self.index.get(node).map_or(0, |&i| self.primary_owned[i])
    }

    /// Total segment copies across all tracked members.
    pub fn sum_owned(&self) -> usize {
        self.owned.iter().sum()
    }

    /// Total primary-owned segments across all tracked members.
    pub fn sum_primary_owned(&self) -> usize {
        self.primary_owned.iter().sum()
    }

    /// Tracked members in insertion order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }
}

/// `node: primary+backup` for each member.
impl fmt::Display for OwnershipStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnershipStatistics{{")?;
        for (i, node) in self.nodes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let primary = self.primary_owned[i];
            write!(f, "{node}: {primary}+{}", self.owned[i].saturating_sub(primary))?;
        }
        write!(f, "}}")
    }
}
