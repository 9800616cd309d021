//! Integration test: a cluster splits in two and heals.
//!
//! Each side repairs its own hash after losing the other half. On merge the
//! union keeps every copy both sides hold, and a rebalance settles the
//! result back to a normal owner count.

use std::sync::Arc;

use strata_integration_tests::{TestCluster, assert_complete, named_members, owned_counts};
use strata_placement::{
    ConsistentHash, ConsistentHashFactory, ReplicatedConsistentHashFactory,
    SyncConsistentHashFactory,
};
use strata_types::{CapacityFactors, HashFunction};

/// Split a six-member cluster into `{0,1,2}` and `{3,4,5}`.
fn split() -> (TestCluster, Arc<ConsistentHash>, Arc<ConsistentHash>) {
    let c = TestCluster::new(6, 128, 2);
    let members = c.members().to_vec();
    let factory = c.factory();
    let left = factory.update_members(c.ch(), &members[..3], None).unwrap();
    let right = factory.update_members(c.ch(), &members[3..], None).unwrap();
    (c, left, right)
}

#[test]
fn test_each_side_repairs_itself() {
    let (_, left, right) = split();
    assert_complete(&left);
    assert_complete(&right);
    assert_eq!(left.members().len(), 3);
    assert_eq!(right.members().len(), 3);
}

#[test]
fn test_union_keeps_both_sides_copies() {
    let (c, left, right) = split();
    let merged = c.factory().union(&left, &right).unwrap();

    assert_eq!(merged.members().len(), 6);
    assert_eq!(merged.num_owners(), 2);
    for segment in 0..128 {
        let owners = merged.locate_owners(segment);
        // Left's owners first, then right's.
        assert_eq!(&owners[..2], left.locate_owners(segment));
        assert_eq!(&owners[2..], right.locate_owners(segment));
        assert_eq!(merged.locate_primary(segment), left.locate_primary(segment));
    }
    assert_eq!(owned_counts(&merged).values().sum::<usize>(), 4 * 128);
}

#[test]
fn test_union_then_rebalance_restores_owner_count() {
    let (c, left, right) = split();
    let factory = c.factory();
    let merged = factory.union(&left, &right).unwrap();
    let settled = factory.rebalance(&merged).unwrap();

    assert_complete(&settled);
    assert_eq!(*settled, **c.ch());
}

#[test]
fn test_union_with_overlapping_sides() {
    let members = named_members(5);
    let factory = SyncConsistentHashFactory::balanced();
    let a = factory
        .create(HashFunction::Blake3, 2, 64, &members[..3], None)
        .unwrap();
    let b = factory
        .create(HashFunction::Blake3, 2, 64, &members[2..], None)
        .unwrap();
    let merged = factory.union(&a, &b).unwrap();

    assert_eq!(merged.members().len(), 5);
    for segment in 0..64 {
        let owners = merged.locate_owners(segment);
        assert!(owners.len() >= 2 && owners.len() <= 4);
        assert_eq!(&owners[..2], a.locate_owners(segment));
    }
}

#[test]
fn test_union_capacity_factors_prefer_first() {
    let members = named_members(4);
    let factory = SyncConsistentHashFactory::balanced();
    let first: CapacityFactors = members[..2].iter().map(|m| (m.node_id, 2.0)).collect();
    let second: CapacityFactors = members.iter().map(|m| (m.node_id, 1.0)).collect();
    let a = factory
        .create(HashFunction::Blake3, 2, 32, &members[..2], Some(&first))
        .unwrap();
    let b = factory
        .create(HashFunction::Blake3, 2, 32, &members, Some(&second))
        .unwrap();

    let factors = factory.union(&a, &b).unwrap().capacity_factors();
    assert_eq!(factors[&members[0].node_id], 2.0);
    assert_eq!(factors[&members[3].node_id], 1.0);
}

#[test]
fn test_union_rejects_different_segment_counts() {
    let members = named_members(3);
    let factory = SyncConsistentHashFactory::balanced();
    let a = factory
        .create(HashFunction::Blake3, 2, 64, &members, None)
        .unwrap();
    let b = factory
        .create(HashFunction::Blake3, 2, 32, &members, None)
        .unwrap();
    assert!(factory.union(&a, &b).is_err());
}

#[test]
fn test_replicated_split_and_merge() {
    let members = named_members(4);
    let factory = ReplicatedConsistentHashFactory::new();
    let whole = factory
        .create(HashFunction::Blake3, 1, 64, &members, None)
        .unwrap();
    let left = factory.update_members(&whole, &members[..2], None).unwrap();
    let right = factory.update_members(&whole, &members[2..], None).unwrap();

    for segment in 0..64 {
        assert_eq!(left.locate_owners(segment).len(), 2);
        let primary = whole.locate_primary(segment);
        if members[..2].iter().any(|m| m.node_id == primary) {
            assert_eq!(left.locate_primary(segment), primary);
        } else {
            assert_eq!(right.locate_primary(segment), primary);
        }
    }

    let merged = factory.union(&left, &right).unwrap();
    assert_eq!(merged.num_owners(), 4);
    for segment in 0..64 {
        assert_eq!(merged.locate_primary(segment), left.locate_primary(segment));
        assert_eq!(merged.locate_owners(segment).len(), 4);
    }
}
