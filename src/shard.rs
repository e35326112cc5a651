//! Shard routing and the per-shard lock/store/ledger bundle (§5
//! Concurrency and resource model).
//!
//! Keys are routed to shards by hashing `(collection, key)`. Each shard
//! owns one `RwLock`, acquired for reads by `get`/`find`/`check` and
//! upgraded to a write lock only at commit time. Transactions that span
//! multiple shards must acquire them in ascending shard-id order —
//! enforced by `ShardMap::lock_many` — to prevent deadlock between
//! concurrently committing transactions that touch an overlapping set
//! of shards in different orders.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use xxhash_rust::xxh64::xxh64;

use crate::ledger::Ledger;
use crate::store::ShardStore;

/// Fixed hash seed; stable across restarts so routing is deterministic.
const SHARD_HASH_SEED: u64 = 0xC8E0_5EED;

/// One shard's mutable state: its document store and its ledger. Both
/// are guarded by the same lock since a commit must update them
/// atomically together.
pub struct ShardState {
    /// This shard's numeric id.
    pub id: u32,
    /// The shard's document store.
    pub store: ShardStore,
    /// The shard's append-only event ledger.
    pub ledger: Ledger,
}

impl ShardState {
    fn new(id: u32) -> Self {
        Self {
            id,
            store: ShardStore::new(),
            ledger: Ledger::new(id),
        }
    }
}

/// The full set of shards, fixed in count for the lifetime of a running
/// server (resharding is out of scope, §1 Non-goals).
pub struct ShardMap {
    shards: Vec<Arc<RwLock<ShardState>>>,
}

impl ShardMap {
    /// Creates a shard map with `count` empty shards.
    pub fn new(count: u32) -> Self {
        assert!(count > 0, "a shard map needs at least one shard");
        let shards = (0..count).map(|id| Arc::new(RwLock::new(ShardState::new(id)))).collect();
        Self { shards }
    }

    /// Number of shards.
    pub fn count(&self) -> u32 {
        self.shards.len() as u32
    }

    /// Routes `(collection, key)` to a shard id by hashing with a fixed
    /// seed and reducing modulo the shard count.
    pub fn route(&self, collection: &str, key: &str) -> u32 {
        let mut buf = Vec::with_capacity(collection.len() + key.len() + 1);
        buf.extend_from_slice(collection.as_bytes());
        buf.push(0);
        buf.extend_from_slice(key.as_bytes());
        (xxh64(&buf, SHARD_HASH_SEED) % self.count() as u64) as u32
    }

    /// A read guard on a single shard.
    pub fn read(&self, shard_id: u32) -> RwLockReadGuard<'_, ShardState> {
        self.shards[shard_id as usize].read()
    }

    /// A write guard on a single shard.
    pub fn write(&self, shard_id: u32) -> RwLockWriteGuard<'_, ShardState> {
        self.shards[shard_id as usize].write()
    }

    /// Acquires write locks on every shard in `shard_ids`, sorted
    /// ascending first so that concurrent multi-shard transactions never
    /// deadlock against each other. `shard_ids` is deduplicated
    /// internally since a transaction may have touched the same shard
    /// through more than one key.
    pub fn write_many(&self, shard_ids: &[u32]) -> Vec<RwLockWriteGuard<'_, ShardState>> {
        let mut ids: Vec<u32> = shard_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        ids.into_iter().map(|id| self.write(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_is_deterministic() {
        let map = ShardMap::new(8);
        let a = map.route("docs", "alice");
        let b = map.route("docs", "alice");
        assert_eq!(a, b);
    }

    #[test]
    fn routing_stays_within_bounds() {
        let map = ShardMap::new(4);
        for i in 0..100 {
            let shard = map.route("docs", &format!("key-{i}"));
            assert!(shard < 4);
        }
    }

    #[test]
    fn write_many_dedups_and_sorts() {
        let map = ShardMap::new(8);
        let guards = map.write_many(&[5, 1, 5, 3]);
        assert_eq!(guards.len(), 3);
        assert_eq!(guards[0].id, 1);
        assert_eq!(guards[1].id, 3);
        assert_eq!(guards[2].id, 5);
    }
}
