//! Pluggable eviction policies for the buffer manager.
//!
//! `LruEviction` is the default and is deliberately testable in
//! isolation from the buffer manager itself (§4.B).

use super::page::PageNo;

/// A victim-selection strategy the buffer manager consults on eviction.
pub trait EvictionPolicy: Send {
    /// Records that `page_no` was just accessed (or newly allocated).
    fn touch(&mut self, page_no: PageNo);
    /// Stops tracking `page_no` (it was discarded or is pinned).
    fn remove(&mut self, page_no: PageNo);
    /// Picks a victim to evict, or `None` if nothing is tracked.
    fn evict(&mut self) -> Option<PageNo>;
}

/// Which built-in policy a `Config` selects; used to construct a fresh
/// `Box<dyn EvictionPolicy>` for a buffer manager instance.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum EvictionPolicyKind {
    /// Least-recently-used, the default.
    Lru,
}

impl EvictionPolicyKind {
    /// Constructs a fresh policy instance of this kind.
    pub fn build(self) -> Box<dyn EvictionPolicy> {
        match self {
            EvictionPolicyKind::Lru => Box::new(LruEviction::new()),
        }
    }
}

/// Least-recently-used eviction, backed by an intrusive doubly linked
/// list over a `Vec` arena so that `touch`/`remove` are O(1) amortized.
pub struct LruEviction {
    cache: lru::LruCache<PageNo, ()>,
}

impl LruEviction {
    /// Creates an empty LRU tracker with no bound (the buffer manager,
    /// not this policy, enforces the byte budget).
    pub fn new() -> Self {
        Self {
            cache: lru::LruCache::unbounded(),
        }
    }
}

impl Default for LruEviction {
    fn default() -> Self {
        Self::new()
    }
}

impl EvictionPolicy for LruEviction {
    fn touch(&mut self, page_no: PageNo) {
        self.cache.put(page_no, ());
    }

    fn remove(&mut self, page_no: PageNo) {
        self.cache.pop(&page_no);
    }

    fn evict(&mut self) -> Option<PageNo> {
        self.cache.pop_lru().map(|(page_no, _)| page_no)
    }
}
