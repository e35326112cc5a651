//! End-to-end witness lifecycle: assemble from committed transaction
//! writes, armor, parse back, and verify against the signer's public
//! key — including across a simulated peer hand-off.

use std::sync::atomic::AtomicU64;

use credb::crypto::signing::Identity;
use credb::ledger::witness::{Witness, WitnessedEvent};
use credb::{IsolationLevel, ShardMap, Transaction};
use serde_json::json;

#[test]
fn witness_assembled_from_a_real_commit_round_trips_through_armor() {
    let shards = ShardMap::new(2);
    let counter = AtomicU64::new(0);
    let identity = Identity::generate();

    let mut tx = Transaction::begin(IsolationLevel::ReadCommitted);
    tx.put("docs", "k1", json!({"v": 1}));
    let outcome = tx.commit(&shards, &counter).unwrap();

    let events: Vec<WitnessedEvent> = outcome
        .writes
        .iter()
        .map(|w| WitnessedEvent {
            shard: w.event_id.shard,
            block: w.event_id.block,
            index: w.event_id.index,
            key: w.key.clone(),
            version: w.version,
            operation: w.kind.as_str().to_string(),
        })
        .collect();

    let witness = Witness::assemble("credb-node", events, &identity);
    let armored = witness.to_armor();
    assert!(armored.starts_with("-----BEGIN CREDB WITNESS-----"));

    let parsed = Witness::from_armor(&armored).unwrap();
    assert!(parsed.verify(&identity.public_key()));
    assert_eq!(parsed.events().len(), 1);
    assert_eq!(parsed.events()[0].key, "k1");
}

#[test]
fn a_witness_signed_by_one_identity_fails_verification_under_another() {
    let identity = Identity::generate();
    let other = Identity::generate();
    let witness = Witness::assemble(
        "credb-node",
        vec![WitnessedEvent {
            shard: 0,
            block: 0,
            index: 0,
            key: "k1".to_string(),
            version: 1,
            operation: "put".to_string(),
        }],
        &identity,
    );
    assert!(!witness.verify(&other.public_key()));
}

#[test]
fn multi_write_transaction_produces_one_witness_event_per_write() {
    let shards = ShardMap::new(1);
    let counter = AtomicU64::new(0);
    let identity = Identity::generate();

    let mut tx = Transaction::begin(IsolationLevel::ReadCommitted);
    tx.put("docs", "k1", json!({"v": 1}));
    tx.put("docs", "k2", json!({"v": 2}));
    let outcome = tx.commit(&shards, &counter).unwrap();
    assert_eq!(outcome.writes.len(), 2);

    let events: Vec<WitnessedEvent> = outcome
        .writes
        .iter()
        .map(|w| WitnessedEvent {
            shard: w.event_id.shard,
            block: w.event_id.block,
            index: w.event_id.index,
            key: w.key.clone(),
            version: w.version,
            operation: w.kind.as_str().to_string(),
        })
        .collect();
    let witness = Witness::assemble("credb-node", events, &identity);
    assert!(witness.verify(&identity.public_key()));
    assert_eq!(witness.shard_high_water_marks().len(), 1);
    assert_eq!(witness.events().len(), 2);
}
