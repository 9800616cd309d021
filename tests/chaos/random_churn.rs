//! Chaos test: random membership churn.
//!
//! A seeded sequence of joins, leaves and rebalances. After every step the
//! hash must be complete, leaves must only touch the leaver's segments and
//! rebalancing must land on exactly what a fresh `create` computes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata_integration_tests::{
    TestCluster, assert_complete, changed_segments, named_members, node_id, random_factors,
    spread_members,
};
use strata_placement::{ConsistentHash, ConsistentHashFactory, SyncConsistentHashFactory};
use strata_types::{HashFunction, Member, NodeTopology};

const STEPS: usize = 60;

fn churn(mut c: TestCluster, rng: &mut StdRng, weighted: bool, sites: usize) {
    let num_segments = c.ch().num_segments();
    let mut next_id = c.members().len();

    for step in 0..STEPS {
        let roll = rng.random_range(0..10);
        if roll < 4 && c.members().len() > 2 {
            let ids = c.member_ids();
            let leaver = ids[rng.random_range(0..ids.len())];
            let before = c.leave(&leaver);
            for segment in 0..num_segments {
                if !before.is_segment_owner(&leaver, segment) {
                    assert_eq!(
                        before.locate_owners(segment),
                        c.ch().locate_owners(segment),
                        "step {step}: segment {segment} moved"
                    );
                }
            }
            let moved = ConsistentHash::diff(&before, c.ch()).unwrap();
            assert!(moved.iter().all(|m| m.to != leaver));
        } else if roll < 8 {
            let name = format!("node-{next_id}");
            let member = Member::with_topology(
                node_id(&name),
                NodeTopology::new(
                    &format!("site-{}", next_id % sites),
                    &format!("rack-{}", next_id % (sites * 2)),
                    &name,
                ),
            );
            next_id += 1;
            let factor = weighted.then(|| [0.5, 1.0, 2.0][rng.random_range(0..3)]);
            let before = c.join(member, factor);
            // Below num_owners members a join tops up every segment.
            if before.members().len() >= before.num_owners() {
                assert!(
                    changed_segments(&before, c.ch()).is_empty(),
                    "step {step}: join moved segments"
                );
            }
        } else {
            c.rebalance();
            let fresh = c
                .factory()
                .create(
                    HashFunction::Blake3,
                    c.ch().num_owners(),
                    num_segments,
                    c.members(),
                    c.ch().explicit_capacity_factors(),
                )
                .unwrap();
            assert_eq!(**c.ch(), *fresh, "step {step}: rebalance is not a fresh create");
        }
        assert_complete(c.ch());
    }
}

#[test]
#[ntest::timeout(120000)]
fn test_random_churn_balanced() {
    let mut rng = StdRng::seed_from_u64(7);
    let c = TestCluster::new(6, 256, 2);
    churn(c, &mut rng, false, 1);
}

#[test]
#[ntest::timeout(120000)]
fn test_random_churn_weighted() {
    let mut rng = StdRng::seed_from_u64(11);
    let members = named_members(5);
    let factors = random_factors(&mut rng, &members);
    let c = TestCluster::build(
        SyncConsistentHashFactory::balanced(),
        members,
        Some(factors),
        256,
        3,
    );
    churn(c, &mut rng, true, 1);
}

#[test]
#[ntest::timeout(120000)]
fn test_random_churn_topology_aware() {
    let mut rng = StdRng::seed_from_u64(23);
    let c = TestCluster::build(
        SyncConsistentHashFactory::topology_aware(),
        spread_members(6, 3),
        None,
        128,
        2,
    );
    churn(c, &mut rng, false, 3);
}
