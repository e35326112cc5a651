//! Buffer manager (Component B).
//!
//! A size-bounded page cache with pluggable eviction, dirty tracking,
//! and an encrypted disk-backing store. Pages are heterogeneous (log
//! blocks, object directories, index nodes); the buffer manager is
//! generic only over `serialize`/`deserialize`/`byte_size` (§9).

pub mod eviction;
pub mod page;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::crypto::block_io::BlockStore;
use crate::error::{CredbError, Result};

pub use eviction::{EvictionPolicy, EvictionPolicyKind, LruEviction};
pub use page::{PageHeader, PageKind, PageNo};

/// Anything the buffer manager can cache: a log block, an object
/// directory node, or an index node.
pub trait Page: Send + Sync + 'static {
    /// Which page kind this serializes as.
    fn kind() -> PageKind;
    /// Serializes the page body (header-exclusive).
    fn serialize(&self) -> Vec<u8>;
    /// Deserializes a page body previously produced by `serialize`.
    fn deserialize(page_no: PageNo, body: &[u8]) -> Result<Self>
    where
        Self: Sized;
    /// Approximate resident byte size, used against the byte budget.
    fn byte_size(&self) -> usize;
}

type Serializer = Box<dyn Fn(&(dyn std::any::Any + Send + Sync)) -> Vec<u8> + Send + Sync>;

struct Resident {
    bytes_hint: usize,
    dirty: bool,
    refcount: usize,
    kind: PageKind,
    serializer: Serializer,
    data: Arc<dyn std::any::Any + Send + Sync>,
}

fn serializer_for<P: Page>() -> Serializer {
    Box::new(|data| {
        let page = data
            .downcast_ref::<P>()
            .expect("serializer type matches the resident page it was created for");
        page.serialize()
    })
}

struct Inner {
    store: Arc<dyn BlockStore>,
    budget_bytes: usize,
    next_page_no: PageNo,
    resident: HashMap<PageNo, Resident>,
    resident_bytes: usize,
    eviction: Box<dyn EvictionPolicy>,
}

/// A reference-counted handle to a resident page of type `P`.
///
/// Dropping the last handle to a page allows it to become eligible for
/// eviction again (§3 invariant: "never evicts a page while any handle
/// to it is live").
pub struct Handle<P: Page> {
    manager: BufferManager,
    page_no: PageNo,
    data: Arc<P>,
}

impl<P: Page> Handle<P> {
    /// The page number this handle refers to.
    pub fn page_no(&self) -> PageNo {
        self.page_no
    }
}

impl<P: Page> std::ops::Deref for Handle<P> {
    type Target = P;
    fn deref(&self) -> &P {
        &self.data
    }
}

impl<P: Page> Clone for Handle<P> {
    fn clone(&self) -> Self {
        let mut inner = self.manager.inner.lock();
        if let Some(resident) = inner.resident.get_mut(&self.page_no) {
            resident.refcount += 1;
        }
        Self {
            manager: self.manager.clone(),
            page_no: self.page_no,
            data: self.data.clone(),
        }
    }
}

impl<P: Page> Drop for Handle<P> {
    fn drop(&mut self) {
        let mut inner = self.manager.inner.lock();
        if let Some(resident) = inner.resident.get_mut(&self.page_no) {
            resident.refcount = resident.refcount.saturating_sub(1);
        }
        self.manager.enforce_budget(&mut inner);
    }
}

/// Fixed-byte-budget page cache with pluggable eviction.
#[derive(Clone)]
pub struct BufferManager {
    inner: Arc<Mutex<Inner>>,
}

impl BufferManager {
    /// Opens a buffer manager over `store`, enforcing `budget_bytes` on
    /// a best-effort basis, using `policy` for victim selection.
    pub fn new(store: Arc<dyn BlockStore>, budget_bytes: usize, policy: EvictionPolicyKind) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                store,
                budget_bytes,
                next_page_no: 1, // page 0 is reserved for the superblock
                resident: HashMap::new(),
                resident_bytes: 0,
                eviction: policy.build(),
            })),
        }
    }

    fn page_blob_name(page_no: PageNo) -> String {
        format!("{page_no:09}.page")
    }

    /// Allocates a fresh page number, constructs `page` in memory,
    /// inserts it resident and dirty, and returns a handle.
    pub fn new_page<P: Page>(&self, page: P) -> Handle<P> {
        let mut inner = self.inner.lock();
        let page_no = inner.next_page_no;
        inner.next_page_no += 1;
        let bytes_hint = page.byte_size();
        let data: Arc<dyn std::any::Any + Send + Sync> = Arc::new(page);
        inner.resident.insert(
            page_no,
            Resident {
                bytes_hint,
                dirty: true,
                refcount: 1,
                kind: P::kind(),
                serializer: serializer_for::<P>(),
                data: data.clone(),
            },
        );
        inner.resident_bytes += bytes_hint;
        inner.eviction.touch(page_no);
        self.enforce_budget(&mut inner);
        Handle {
            manager: self.clone(),
            page_no,
            data: data.downcast::<P>().expect("page type matches on creation"),
        }
    }

    /// Returns the in-memory page if resident; otherwise loads it from
    /// the backing block store.
    pub fn get_page<P: Page>(&self, page_no: PageNo) -> Result<Handle<P>> {
        {
            let mut inner = self.inner.lock();
            if let Some(resident) = inner.resident.get_mut(&page_no) {
                resident.refcount += 1;
                inner.eviction.touch(page_no);
                let data = resident
                    .data
                    .clone()
                    .downcast::<P>()
                    .map_err(|_| CredbError::integrity("page kind mismatch in cache"))?;
                return Ok(Handle {
                    manager: self.clone(),
                    page_no,
                    data,
                });
            }
        }

        let store = self.inner.lock().store.clone();
        let blob_name = Self::page_blob_name(page_no);
        let raw = store.read(&blob_name)?.ok_or(CredbError::NotFound)?;
        let (_, body) = PageHeader::decode(&raw, page_no)?;
        let page = P::deserialize(page_no, body)?;
        trace!(page_no, "loaded page from disk");

        let mut inner = self.inner.lock();
        // another thread may have raced us to populate the cache
        if let Some(resident) = inner.resident.get_mut(&page_no) {
            resident.refcount += 1;
            inner.eviction.touch(page_no);
            let data = resident
                .data
                .clone()
                .downcast::<P>()
                .map_err(|_| CredbError::integrity("page kind mismatch in cache"))?;
            return Ok(Handle {
                manager: self.clone(),
                page_no,
                data,
            });
        }
        let bytes_hint = page.byte_size();
        let data: Arc<dyn std::any::Any + Send + Sync> = Arc::new(page);
        inner.resident.insert(
            page_no,
            Resident {
                bytes_hint,
                dirty: false,
                refcount: 1,
                kind: P::kind(),
                serializer: serializer_for::<P>(),
                data: data.clone(),
            },
        );
        inner.resident_bytes += bytes_hint;
        inner.eviction.touch(page_no);
        self.enforce_budget(&mut inner);
        Ok(Handle {
            manager: self.clone(),
            page_no,
            data: data.downcast::<P>().expect("page type matches on load"),
        })
    }

    /// Marks a resident page dirty.
    pub fn mark_dirty(&self, page_no: PageNo) {
        let mut inner = self.inner.lock();
        if let Some(resident) = inner.resident.get_mut(&page_no) {
            resident.dirty = true;
        }
    }

    /// Writes every dirty resident page back through the block store
    /// and clears dirty flags.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let dirty_pages: Vec<PageNo> = inner
            .resident
            .iter()
            .filter(|(_, r)| r.dirty)
            .map(|(no, _)| *no)
            .collect();
        for page_no in dirty_pages {
            self.flush_one(&mut inner, page_no)?;
        }
        Ok(())
    }

    fn flush_one(&self, inner: &mut Inner, page_no: PageNo) -> Result<()> {
        let resident = inner
            .resident
            .get_mut(&page_no)
            .expect("page_no came from resident map");
        let serialized = (resident.serializer)(&resident.data);
        let kind = resident.kind;
        let encoded = PageHeader::encode(page_no, kind, &serialized);
        let blob_name = Self::page_blob_name(page_no);
        inner.store.write(&blob_name, &encoded)?;
        resident.dirty = false;
        debug!(page_no, "flushed dirty page");
        Ok(())
    }

    fn enforce_budget(&self, inner: &mut Inner) {
        // Pages popped from the eviction policy while pinned are
        // skipped rather than evicted, but `evict()` removes them from
        // the policy's own tracking. Re-touch them once the sweep is
        // done so a later sweep (once they're unpinned) can still find
        // and reclaim them, instead of leaking them out of eviction
        // tracking forever.
        let mut skipped_pinned = Vec::new();
        while inner.resident_bytes > inner.budget_bytes {
            let victim = match inner.eviction.evict() {
                Some(v) => v,
                None => break,
            };
            let evictable = inner
                .resident
                .get(&victim)
                .map(|r| r.refcount == 0)
                .unwrap_or(false);
            if !evictable {
                skipped_pinned.push(victim);
                continue;
            }
            if let Some(resident) = inner.resident.get(&victim) {
                if resident.dirty {
                    let _ = self.flush_one(inner, victim);
                }
            }
            if let Some(resident) = inner.resident.remove(&victim) {
                inner.resident_bytes = inner.resident_bytes.saturating_sub(resident.bytes_hint);
            }
        }
        for page_no in skipped_pinned {
            inner.eviction.touch(page_no);
        }
    }

    /// Total resident bytes across all cached pages (testable against
    /// the byte budget, §8 invariant 3).
    pub fn resident_bytes(&self) -> usize {
        self.inner.lock().resident_bytes
    }

    /// Number of resident pages.
    pub fn resident_count(&self) -> usize {
        self.inner.lock().resident.len()
    }

    /// Number of resident pages currently marked dirty (observability
    /// surface, `GetStatistics`).
    pub fn dirty_count(&self) -> usize {
        self.inner.lock().resident.values().filter(|r| r.dirty).count()
    }
}
