//! Ledger events and their identifiers (§4.D).

use serde::{Deserialize, Serialize};

/// Identifies an event by its position in the ledger: which shard wrote
/// it, which log block it landed in, and its index within that block.
/// Ordered lexicographically, which matches ledger append order within
/// a single shard but is only a total order there — cross-shard
/// ordering needs `ledger::order::order`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId {
    /// Which shard produced this event.
    pub shard: u32,
    /// Which log block within the shard's ledger.
    pub block: u64,
    /// Index of the event within its block.
    pub index: u32,
}

/// The sentinel "no event has happened yet" id, ordered before every
/// real event.
pub const INVALID_EVENT: EventId = EventId {
    shard: 0,
    block: 0,
    index: 0,
};

impl EventId {
    /// Builds an event id from its three components.
    pub fn new(shard: u32, block: u64, index: u32) -> Self {
        Self { shard, block, index }
    }

    /// Whether this is the sentinel "nothing has happened" id.
    pub fn is_invalid(&self) -> bool {
        *self == INVALID_EVENT
    }
}

/// What kind of write an event records.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    /// A full value replacement.
    Put,
    /// A shallow merge into an existing value.
    Add,
    /// A deletion.
    Remove,
}

impl EventKind {
    /// The lowercase operation name used in witness records.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Put => "put",
            EventKind::Add => "add",
            EventKind::Remove => "remove",
        }
    }
}

/// A single committed write, as it appears in a shard's ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// This event's own id.
    pub id: EventId,
    /// The collection the write landed in.
    pub collection: String,
    /// The key that was written.
    pub key: String,
    /// What kind of write this was.
    pub kind: EventKind,
    /// The transaction-local sequence number, used to keep multi-write
    /// transactions grouped when assembling a witness.
    pub txn_seq: u64,
}
