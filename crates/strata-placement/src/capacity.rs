//! Capacity factors: validation, defaults and expected segment budgets.

use std::collections::BTreeMap;

use strata_types::{CapacityFactors, Member, NodeId};

use crate::error::PlacementError;

/// Allowed excess over the expected owned-segment count.
pub const OWNED_SEGMENTS_ALLOWED_VARIATION: f64 = 0.10;

/// Allowed excess over the expected primary-owned segment count.
pub const PRIMARY_OWNED_SEGMENTS_ALLOWED_VARIATION: f64 = 0.20;

/// Check explicit capacity factors against the member list.
///
/// Without explicit factors every member implicitly has capacity 1.0 and
/// there is nothing to check.
pub fn validate(
    members: &[Member],
    capacity_factors: Option<&CapacityFactors>,
) -> Result<(), PlacementError> {
    let Some(factors) = capacity_factors else {
        return Ok(());
    };

    let mut total = 0.0f64;
    for member in members {
        let value = factors.get(&member.node_id).copied();
        match value {
            Some(v) if v.is_finite() && v >= 0.0 => total += v as f64,
            _ => {
                return Err(PlacementError::InvalidCapacity {
                    node: member.node_id,
                    value,
                });
            }
        }
    }

    if !members.is_empty() && total == 0.0 {
        return Err(PlacementError::AllZeroCapacity);
    }
    Ok(())
}

/// Maximum number of segments a member may take before a budget rejects it.
///
/// `floor(expected + max(expected * variation, 1))`: always leaves room for
/// at least one segment above the expectation.
pub fn max_allowed(expected: f64, variation: f64) -> usize {
    (expected + (expected * variation).max(1.0)).floor() as usize
}

/// Resolved capacity factors for one assignment pass.
#[derive(Debug, Clone)]
pub struct CapacityModel {
    factors: BTreeMap<NodeId, f32>,
    /// Capacity descending, then node ID ascending.
    sorted: Vec<NodeId>,
    total_capacity: f64,
    num_segments: usize,
}

impl CapacityModel {
    /// Validate `capacity_factors` and resolve defaults.
    pub fn new(
        members: &[Member],
        capacity_factors: Option<&CapacityFactors>,
        num_segments: usize,
    ) -> Result<Self, PlacementError> {
        if members.is_empty() {
            return Err(PlacementError::NoMembers);
        }
        validate(members, capacity_factors)?;

        let factors: BTreeMap<NodeId, f32> = members
            .iter()
            .map(|m| {
                let factor = capacity_factors
                    .and_then(|f| f.get(&m.node_id).copied())
                    .unwrap_or(1.0);
                (m.node_id, factor)
            })
            .collect();

        let mut sorted: Vec<NodeId> = factors.keys().copied().collect();
        sorted.sort_by(|a, b| factors[b].total_cmp(&factors[a]).then_with(|| a.cmp(b)));

        let total_capacity = factors.values().map(|&f| f as f64).sum();

        Ok(Self {
            factors,
            sorted,
            total_capacity,
            num_segments,
        })
    }

    /// Capacity factor of `node`, 0 for members outside the model.
    pub fn factor(&self, node: &NodeId) -> f32 {
        self.factors.get(node).copied().unwrap_or(0.0)
    }

    /// All members, capacity descending then ID ascending.
    pub fn sorted_members(&self) -> &[NodeId] {
        &self.sorted
    }

    /// Members with a positive capacity factor, in sorted order.
    pub fn loaded_members(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.sorted
            .iter()
            .copied()
            .filter(|n| self.factor(n) > 0.0)
    }

    pub fn loaded_member_count(&self) -> usize {
        self.loaded_members().count()
    }

    pub fn total_capacity(&self) -> f64 {
        self.total_capacity
    }

    pub fn num_segments(&self) -> usize {
        self.num_segments
    }

    /// Replication factor achievable with the loaded members.
    pub fn actual_num_owners(&self, num_owners: usize) -> usize {
        num_owners.min(self.loaded_member_count())
    }

    /// Number of segments `node` should own when every segment has `num_copies` owners.
    ///
    /// Shares are proportional to capacity, except that nobody can own a
    /// segment twice: a member whose share would exceed `num_segments` is
    /// capped there and the rest is split among the others.
    pub fn expected_segments(&self, node: &NodeId, num_copies: usize) -> f64 {
        let node_factor = self.factor(node) as f64;
        if node_factor == 0.0 {
            return 0.0;
        }

        let num_segments = self.num_segments as f64;
        let mut remaining_capacity = self.total_capacity;
        let mut remaining_copies = (num_copies * self.num_segments) as f64;
        for member in &self.sorted {
            let factor = self.factor(member) as f64;
            let share = factor / remaining_capacity * remaining_copies;
            if share > num_segments {
                if member == node {
                    return num_segments;
                }
                remaining_capacity -= factor;
                remaining_copies -= num_segments;
            } else {
                // Everyone from here on is below the cap.
                return node_factor / remaining_capacity * remaining_copies;
            }
        }
        // Every member saturated before reaching `node`, which means it is not
        // part of the model.
        0.0
    }
}
