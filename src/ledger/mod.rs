//! The append-only per-shard ledger, its partial order, and witnesses
//! distilled from it (Component D).

pub mod event;
pub mod order;
pub mod witness;

use crate::ledger::event::{Event, EventId};

/// An in-memory, append-only log of committed events for one shard.
/// Durable persistence of log blocks goes through the buffer manager
/// (`pager`) via `PageKind::LogBlock`; this type is the logical view
/// transactions and witness assembly operate on.
#[derive(Debug, Default)]
pub struct Ledger {
    shard: u32,
    block: u64,
    block_base: usize,
    events: Vec<Event>,
}

impl Ledger {
    /// Creates an empty ledger for `shard`.
    pub fn new(shard: u32) -> Self {
        Self {
            shard,
            block: 0,
            block_base: 0,
            events: Vec::new(),
        }
    }

    /// Appends a new event, assigning it the next offset within the
    /// current block, and returns its id.
    pub fn append(
        &mut self,
        collection: String,
        key: String,
        kind: event::EventKind,
        txn_seq: u64,
    ) -> EventId {
        let index = (self.events.len() - self.block_base) as u32;
        let id = EventId::new(self.shard, self.block, index);
        self.events.push(Event {
            id,
            collection,
            key,
            kind,
            txn_seq,
        });
        id
    }

    /// Rolls over to a fresh log block, used once the current block's
    /// backing page fills (§4.D / §9 "Polymorphic pages").
    pub fn roll_block(&mut self) {
        self.block += 1;
        self.block_base = self.events.len();
    }

    /// The highest event id appended so far, or the shard's invalid
    /// sentinel if nothing has been appended yet.
    pub fn high_water_mark(&self) -> EventId {
        self.events
            .last()
            .map(|e| e.id)
            .unwrap_or(event::INVALID_EVENT)
    }

    /// All events with an id strictly greater than `since`, in order.
    pub fn events_since(&self, since: EventId) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(move |e| e.id > since)
    }

    /// Total number of events recorded.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the ledger has no events yet.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::event::EventKind;

    #[test]
    fn append_assigns_ascending_indices_within_a_block() {
        let mut ledger = Ledger::new(0);
        let a = ledger.append("docs".into(), "k1".into(), EventKind::Put, 1);
        let b = ledger.append("docs".into(), "k2".into(), EventKind::Put, 1);
        assert_eq!(a.index, 0);
        assert_eq!(b.index, 1);
        assert!(a < b);
    }

    #[test]
    fn roll_block_resets_index_within_a_new_block() {
        let mut ledger = Ledger::new(0);
        ledger.append("docs".into(), "k1".into(), EventKind::Put, 1);
        ledger.roll_block();
        let id = ledger.append("docs".into(), "k2".into(), EventKind::Put, 2);
        assert_eq!(id.block, 1);
        assert_eq!(id.index, 0);
    }

    #[test]
    fn events_since_excludes_the_watermark_itself() {
        let mut ledger = Ledger::new(0);
        let a = ledger.append("docs".into(), "k1".into(), EventKind::Put, 1);
        ledger.append("docs".into(), "k2".into(), EventKind::Put, 1);
        let since: Vec<_> = ledger.events_since(a).collect();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].key, "k2");
    }
}
