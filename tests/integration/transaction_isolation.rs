//! End-to-end isolation-level scenarios against the transaction engine,
//! matching the reference scenarios for disjoint-key commits,
//! repeatable-read conflicts, and serializable phantom reads.

use std::sync::atomic::AtomicU64;

use credb::{IsolationLevel, ShardMap, Transaction};
use serde_json::json;

#[test]
fn two_disjoint_key_transactions_both_commit_under_repeatable_read() {
    let shards = ShardMap::new(4);
    let counter = AtomicU64::new(0);

    let mut tx_a = Transaction::begin(IsolationLevel::RepeatableRead);
    tx_a.put("accounts", "alice", json!({"balance": 100}));
    let outcome_a = tx_a.commit(&shards, &counter).unwrap();
    assert_eq!(outcome_a.writes.len(), 1);

    let mut tx_b = Transaction::begin(IsolationLevel::RepeatableRead);
    tx_b.put("accounts", "bob", json!({"balance": 50}));
    let outcome_b = tx_b.commit(&shards, &counter).unwrap();
    assert_eq!(outcome_b.writes.len(), 1);

    let shard_alice = shards.route("accounts", "alice");
    let shard_bob = shards.route("accounts", "bob");
    assert_eq!(shards.read(shard_alice).store.get("accounts", "alice").unwrap().0, json!({"balance": 100}));
    assert_eq!(shards.read(shard_bob).store.get("accounts", "bob").unwrap().0, json!({"balance": 50}));
}

#[test]
fn read_committed_never_validates_its_reads() {
    let shards = ShardMap::new(4);
    let counter = AtomicU64::new(0);

    let mut setup = Transaction::begin(IsolationLevel::ReadCommitted);
    setup.put("docs", "k1", json!({"v": 1}));
    setup.commit(&shards, &counter).unwrap();

    let mut reader = Transaction::begin(IsolationLevel::ReadCommitted);
    let _ = reader.get(&shards, "docs", "k1");

    let mut writer = Transaction::begin(IsolationLevel::ReadCommitted);
    writer.put("docs", "k1", json!({"v": 2}));
    writer.commit(&shards, &counter).unwrap();

    // ReadCommitted does not validate reads at commit, so the reader's
    // own (now-stale) commit still succeeds.
    reader.put("docs", "k2", json!({"v": 1}));
    assert!(reader.commit(&shards, &counter).is_ok());
}

#[test]
fn repeatable_read_conflicts_on_an_intervening_write() {
    let shards = ShardMap::new(4);
    let counter = AtomicU64::new(0);

    let mut setup = Transaction::begin(IsolationLevel::ReadCommitted);
    setup.put("docs", "k1", json!({"v": 1}));
    setup.commit(&shards, &counter).unwrap();

    let mut reader = Transaction::begin(IsolationLevel::RepeatableRead);
    assert_eq!(reader.get(&shards, "docs", "k1").unwrap().0, json!({"v": 1}));

    let mut writer = Transaction::begin(IsolationLevel::ReadCommitted);
    writer.put("docs", "k1", json!({"v": 2}));
    writer.commit(&shards, &counter).unwrap();

    reader.put("docs", "k2", json!({"v": 1}));
    let err = reader.commit(&shards, &counter).unwrap_err();
    assert_eq!(err.to_string(), "Key [k1] reads outdated value");
}

#[test]
fn serializable_detects_a_phantom_inserted_after_the_find() {
    let shards = ShardMap::new(1);
    let counter = AtomicU64::new(0);
    let shard_id = 0;

    let mut setup = Transaction::begin(IsolationLevel::ReadCommitted);
    setup.put("docs", "a", json!({"status": "active"}));
    setup.commit(&shards, &counter).unwrap();

    let mut reader = Transaction::begin(IsolationLevel::Serializable);
    let predicates = credb::store::predicate::PredicateSet::new(vec![credb::store::predicate::Predicate::eq(
        "status",
        json!("active"),
    )]);
    let found = reader.find(&shards, shard_id, "docs", &predicates);
    assert_eq!(found, vec!["a".to_string()]);

    let mut writer = Transaction::begin(IsolationLevel::ReadCommitted);
    writer.put("docs", "b", json!({"status": "active"}));
    writer.commit(&shards, &counter).unwrap();

    let err = reader.commit(&shards, &counter).unwrap_err();
    assert!(err.to_string().contains("Phantom read"));
}

#[test]
fn a_transaction_cannot_be_committed_twice() {
    let shards = ShardMap::new(2);
    let counter = AtomicU64::new(0);
    let mut tx = Transaction::begin(IsolationLevel::ReadCommitted);
    tx.put("docs", "k1", json!({"v": 1}));
    tx.commit(&shards, &counter).unwrap();
    assert!(tx.commit(&shards, &counter).is_err());
}
