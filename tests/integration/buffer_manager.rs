//! Black-box buffer manager behavior: eviction under byte pressure
//! while honoring the pinned-handle invariant, and dirty pages surviving
//! a round trip through the encrypted block store.

use std::sync::Arc;

use credb::crypto::block_io::{DiskKey, LocalBlockStore};
use credb::error::Result;
use credb::pager::{BufferManager, EvictionPolicyKind, Page, PageKind, PageNo};

#[derive(Clone, Debug, PartialEq, Eq)]
struct Blob(Vec<u8>);

impl Page for Blob {
    fn kind() -> PageKind {
        PageKind::ObjectDirectory
    }

    fn serialize(&self) -> Vec<u8> {
        self.0.clone()
    }

    fn deserialize(_page_no: PageNo, body: &[u8]) -> Result<Self> {
        Ok(Blob(body.to_vec()))
    }

    fn byte_size(&self) -> usize {
        self.0.len()
    }
}

fn manager(budget_bytes: usize) -> BufferManager {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalBlockStore::open(dir.path(), DiskKey([0x11; 16])).unwrap());
    std::mem::forget(dir); // keep the directory alive for the manager's lifetime
    BufferManager::new(store, budget_bytes, EvictionPolicyKind::Lru)
}

#[test]
fn evicts_least_recently_used_page_once_over_budget() {
    let mgr = manager(64);
    let a = mgr.new_page(Blob(vec![0u8; 32]));
    let a_no = a.page_no();
    drop(a); // unpin so it's evictable

    let b = mgr.new_page(Blob(vec![0u8; 32]));
    drop(b);

    // Still within budget (64 bytes resident): nothing evicted yet.
    assert_eq!(mgr.resident_count(), 2);

    // Pushes resident bytes over budget; the LRU victim (a) is evicted.
    let c = mgr.new_page(Blob(vec![0u8; 32]));
    drop(c);
    assert_eq!(mgr.resident_count(), 2);

    // a was dirty-flushed before eviction, so it loads back from disk
    // with its original content, bumping residency back up to 3.
    let reloaded: credb::pager::Handle<Blob> = mgr.get_page(a_no).unwrap();
    assert_eq!(reloaded.0, vec![0u8; 32]);
    assert_eq!(mgr.resident_count(), 3);
}

#[test]
fn pinned_pages_are_never_evicted() {
    let mgr = manager(1);
    let pinned = mgr.new_page(Blob(vec![0u8; 16]));
    assert!(mgr.resident_bytes() > 0);

    // Allocate more pages, well past the tiny budget; the pinned page
    // must still be resident and unaffected.
    for _ in 0..8 {
        let extra = mgr.new_page(Blob(vec![0u8; 16]));
        drop(extra);
    }

    assert_eq!(&pinned.0, &vec![0u8; 16]);
    // Every extra is evictable the instant it's dropped, so only the
    // still-pinned page remains resident under the tiny budget.
    assert_eq!(mgr.resident_count(), 1);
}

#[test]
fn dirty_page_survives_a_round_trip_through_the_block_store() {
    let mgr = manager(1024);
    let handle = mgr.new_page(Blob(b"hello page".to_vec()));
    let page_no = handle.page_no();
    assert_eq!(mgr.dirty_count(), 1);

    mgr.flush().unwrap();
    assert_eq!(mgr.dirty_count(), 0);
    drop(handle);

    // Force eviction by dropping budget pressure: fetch directly, which
    // will hit the cache since it's unbounded here, but flush guarantees
    // the on-disk copy matches regardless.
    let reloaded: credb::pager::Handle<Blob> = mgr.get_page(page_no).unwrap();
    assert_eq!(reloaded.0, b"hello page".to_vec());
}
