//! Black-box ledger ordering: single-shard total order, cross-shard
//! concurrency, and witness-level ordering derived from high-water
//! marks.

use credb::ledger::event::{EventId, EventKind};
use credb::ledger::order::{order, order_witnesses, OrderResult};
use credb::ledger::witness::{Witness, WitnessedEvent};
use credb::ledger::Ledger;
use credb::crypto::signing::Identity;

#[test]
fn events_in_the_same_shard_are_totally_ordered() {
    let mut ledger = Ledger::new(0);
    let a = ledger.append("docs".to_string(), "k1".to_string(), EventKind::Put, 1);
    let b = ledger.append("docs".to_string(), "k2".to_string(), EventKind::Put, 1);
    ledger.roll_block();
    let c = ledger.append("docs".to_string(), "k3".to_string(), EventKind::Put, 2);

    assert_eq!(order(a, b), OrderResult::Before);
    assert_eq!(order(b, c), OrderResult::Before);
    assert_eq!(order(c, a), OrderResult::After);
}

#[test]
fn events_in_different_shards_are_unknown_without_an_established_causal_link() {
    let a = EventId::new(0, 0, 0);
    let b = EventId::new(1, 0, 0);
    assert_eq!(order(a, b), OrderResult::Unknown);
}

fn witness_for(identity: &Identity, server_name: &str, events: Vec<WitnessedEvent>) -> Witness {
    Witness::assemble(server_name, events, identity)
}

fn event(shard: u32, block: u64, index: u32, key: &str) -> WitnessedEvent {
    WitnessedEvent {
        shard,
        block,
        index,
        key: key.to_string(),
        version: 1,
        operation: "put".to_string(),
    }
}

#[test]
fn witnesses_covering_disjoint_shards_order_as_unknown() {
    let identity = Identity::generate();
    let w1 = witness_for(&identity, "node-a", vec![event(0, 0, 0, "k1")]);
    let w2 = witness_for(&identity, "node-a", vec![event(1, 0, 0, "k2")]);
    assert_eq!(order_witnesses(&w1, &w2), OrderResult::Unknown);
}

#[test]
fn witnesses_covering_overlapping_shards_order_by_dominance() {
    let identity = Identity::generate();
    let earlier = witness_for(&identity, "node-a", vec![event(0, 0, 0, "k1")]);
    let later = witness_for(&identity, "node-a", vec![event(0, 0, 5, "k1"), event(1, 2, 1, "k2")]);

    assert_eq!(order_witnesses(&earlier, &later), OrderResult::Before);
    assert_eq!(order_witnesses(&later, &earlier), OrderResult::After);
}

#[test]
fn witnesses_with_identical_coverage_are_equal() {
    let identity = Identity::generate();
    let a = witness_for(&identity, "node-a", vec![event(0, 3, 2, "k1")]);
    let b = witness_for(&identity, "node-a", vec![event(0, 3, 2, "k1")]);
    assert_eq!(order_witnesses(&a, &b), OrderResult::Equal);
}
