//! Black-box document store flows: collections, version chains, indexes
//! and predicate search, and diffs across versions, all exercised
//! through `ShardMap`/`ShardStore` the way a `Dispatcher` would drive
//! them.

use credb::ledger::event::EventId;
use credb::store::document::Value;
use credb::store::predicate::{Predicate, PredicateSet};
use credb::ShardMap;
use serde_json::json;

#[test]
fn put_add_remove_round_trips_through_a_shard() {
    let shards = ShardMap::new(4);
    let shard_id = shards.route("users", "alice");

    {
        let mut shard = shards.write(shard_id);
        shard
            .store
            .apply_put("users", "alice", Value::new(json!({"age": 30})), EventId::new(shard_id, 0, 0))
            .unwrap();
    }
    assert_eq!(shards.read(shard_id).store.get("users", "alice").unwrap().0, json!({"age": 30}));

    {
        let mut shard = shards.write(shard_id);
        shard
            .store
            .apply_add("users", "alice", &Value::new(json!({"city": "ba"})), EventId::new(shard_id, 0, 1))
            .unwrap();
    }
    assert_eq!(
        shards.read(shard_id).store.get("users", "alice").unwrap().0,
        json!({"age": 30, "city": "ba"})
    );

    {
        let mut shard = shards.write(shard_id);
        shard.store.apply_remove("users", "alice", EventId::new(shard_id, 0, 2)).unwrap();
    }
    assert!(!shards.read(shard_id).store.has("users", "alice"));
    assert_eq!(shards.read(shard_id).store.history("users", "alice").len(), 3);
}

#[test]
fn secondary_index_keeps_up_with_every_write_kind() {
    let shards = ShardMap::new(1);
    let shard_id = 0;

    {
        let mut shard = shards.write(shard_id);
        shard.store.create_index("users", "status");
        shard
            .store
            .apply_put("users", "a", Value::new(json!({"status": "active"})), EventId::new(0, 0, 0))
            .unwrap();
        shard
            .store
            .apply_put("users", "b", Value::new(json!({"status": "active"})), EventId::new(0, 0, 1))
            .unwrap();
        shard
            .store
            .apply_put("users", "c", Value::new(json!({"status": "inactive"})), EventId::new(0, 0, 2))
            .unwrap();
    }

    let predicates = PredicateSet::new(vec![Predicate::eq("status", json!("active"))]);
    let mut found = shards.read(shard_id).store.find("users", &predicates);
    found.sort();
    assert_eq!(found, vec!["a".to_string(), "b".to_string()]);

    {
        let mut shard = shards.write(shard_id);
        shard
            .store
            .apply_add("users", "c", &Value::new(json!({"status": "active"})), EventId::new(0, 0, 3))
            .unwrap();
        shard.store.apply_remove("users", "a", EventId::new(0, 0, 4)).unwrap();
    }
    let mut found = shards.read(shard_id).store.find("users", &predicates);
    found.sort();
    assert_eq!(found, vec!["b".to_string(), "c".to_string()]);
}

#[test]
fn diff_between_two_versions_reports_value_level_changes() {
    let shards = ShardMap::new(1);
    let shard_id = 0;
    let from = EventId::new(0, 0, 0);
    let to = EventId::new(0, 0, 1);
    {
        let mut shard = shards.write(shard_id);
        shard
            .store
            .apply_put("docs", "k1", Value::new(json!({"a": 1, "b": 2})), from)
            .unwrap();
        shard
            .store
            .apply_put("docs", "k1", Value::new(json!({"a": 1, "c": 3})), to)
            .unwrap();
    }
    let diff = shards.read(shard_id).store.diff("docs", "k1", from, to).unwrap();
    assert_eq!(diff.changed, vec![("c".to_string(), json!(3))]);
    assert_eq!(diff.removed, vec!["b".to_string()]);
}

#[test]
fn dropping_an_index_stops_its_upkeep_but_keeps_documents() {
    let shards = ShardMap::new(1);
    let shard_id = 0;
    {
        let mut shard = shards.write(shard_id);
        shard.store.create_index("docs", "status");
        shard
            .store
            .apply_put("docs", "k1", Value::new(json!({"status": "active"})), EventId::new(0, 0, 0))
            .unwrap();
        shard.store.drop_index("docs", "status");
    }
    assert!(shards.read(shard_id).store.indexed_paths_of("docs").is_empty());
    assert!(shards.read(shard_id).store.has("docs", "k1"));
}
