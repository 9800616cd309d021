//! Integration test: the reference four-member cluster.
//!
//! Four equal members, two owners, 256 segments. Create the hash, check
//! balance, then remove one member and check that only its segments move.

use strata_integration_tests::{
    TestCluster, assert_complete, changed_segments, node_id, owned_counts,
};
use strata_placement::SyncConsistentHashFactory;
use strata_types::Member;

fn abcd() -> TestCluster {
    let members = ["A", "B", "C", "D"]
        .iter()
        .map(|name| Member::new(node_id(name)))
        .collect();
    TestCluster::build(SyncConsistentHashFactory::balanced(), members, None, 256, 2)
}

#[test]
fn test_four_members_balanced_create() {
    let c = abcd();
    let ch = c.ch();

    assert_eq!(ch.num_segments(), 256);
    assert_complete(ch);

    let counts = owned_counts(ch);
    assert_eq!(counts.values().sum::<usize>(), 512);
    for (node, owned) in &counts {
        // 128 expected copies each, within 10%.
        assert!((115..=141).contains(owned), "{node} owns {owned}");
    }
}

#[test]
fn test_four_members_every_segment_has_a_primary_and_backup() {
    let c = abcd();
    let ch = c.ch();
    for segment in 0..256 {
        let owners = ch.locate_owners(segment);
        assert_eq!(ch.locate_primary(segment), owners[0]);
        assert_ne!(owners[0], owners[1]);
    }
}

#[test]
fn test_remove_d_only_moves_d_segments() {
    let mut c = abcd();
    let d = node_id("D");
    let before = c.leave(&d);
    let after = c.ch();

    assert_eq!(after.members().len(), 3);
    assert!(!after.contains_member(&d));
    assert_complete(after);

    let had_d = before.segments_for_owner(&d);
    for segment in 0..256 {
        let old = before.locate_owners(segment);
        let new = after.locate_owners(segment);
        if had_d.contains(&segment) {
            assert_eq!(new.len(), 2);
            assert!(!new.contains(&d));
            // The surviving owner keeps its copy.
            for owner in old.iter().filter(|o| **o != d) {
                assert!(new.contains(owner), "segment {segment} lost {owner}");
            }
        } else {
            assert_eq!(old, new, "segment {segment} moved without losing an owner");
        }
    }

    let changed = changed_segments(&before, after);
    assert_eq!(changed.len(), had_d.len());
}

#[test]
fn test_remove_d_keeps_surviving_primaries() {
    let mut c = abcd();
    let d = node_id("D");
    let before = c.leave(&d);
    let after = c.ch();
    for segment in 0..256 {
        let primary = before.locate_primary(segment);
        if primary != d {
            assert_eq!(after.locate_primary(segment), primary);
        }
    }
}
