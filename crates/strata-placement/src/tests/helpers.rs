//! Shared test utilities for strata-placement tests.

use rand::Rng;
use rand::rngs::StdRng;
use strata_types::{CapacityFactors, HashFunction, Member, NodeId};

use crate::assign::{Assignment, BalancedPolicy, assign_owners};
use crate::capacity::CapacityModel;
use crate::segment::SegmentLayout;
use crate::vnode::{VirtualNodeRings, virtual_nodes_per_member};

pub fn node(n: u8) -> NodeId {
    NodeId::from([n; 32])
}

pub fn members(ids: &[u8]) -> Vec<Member> {
    ids.iter().map(|&n| Member::new(node(n))).collect()
}

/// Members with IDs derived from names, so their ring seeds look random.
pub fn named_members(count: usize) -> Vec<Member> {
    (0..count)
        .map(|i| Member::new(NodeId::from_data(format!("member-{i}").as_bytes())))
        .collect()
}

/// A capacity factor for every member, drawn from a few typical ratios.
pub fn random_factors(rng: &mut StdRng, members: &[Member]) -> CapacityFactors {
    const RATIOS: [f32; 5] = [0.5, 1.0, 1.0, 2.0, 4.0];
    members
        .iter()
        .map(|m| (m.node_id, RATIOS[rng.random_range(0..RATIOS.len())]))
        .collect()
}

/// Run a balanced assignment and keep the policy for budget checks.
pub fn balanced_assignment(
    members: &[Member],
    capacity_factors: Option<&CapacityFactors>,
    num_segments: usize,
    num_owners: usize,
) -> (Assignment, BalancedPolicy, CapacityModel) {
    let model = CapacityModel::new(members, capacity_factors, num_segments).unwrap();
    let copies = model.actual_num_owners(num_owners);
    let policy = BalancedPolicy::new(&model, copies);
    let rings = VirtualNodeRings::build(
        model.loaded_members(),
        HashFunction::Blake3,
        virtual_nodes_per_member(num_segments),
    );
    let layout = SegmentLayout::new(num_segments).unwrap();
    let assignment = assign_owners(
        &policy,
        &rings,
        &layout,
        model.sorted_members().iter().copied(),
        copies,
    )
    .unwrap();
    (assignment, policy, model)
}
