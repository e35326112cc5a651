//! Per-key version chains (§2 Data model, §4.C).
//!
//! Every write to a key appends a new `ChainEntry` to the head of its
//! chain rather than mutating in place, so that `history` and
//! `diff` can walk backwards through prior versions and so that
//! repeatable-read transactions can pin a version they observed.

use serde::{Deserialize, Serialize};

use crate::error::{CredbError, Result};
use crate::ledger::event::EventId;
use crate::store::document::Value;

/// What kind of write produced a chain entry.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum ChainOp {
    /// A full replacement of the document's value.
    Put,
    /// A shallow merge into the document's value.
    Add,
    /// The key was deleted; the chain continues as a tombstone.
    Remove,
}

/// A single version of a key's value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEntry {
    /// The ledger event that produced this version.
    pub event_id: EventId,
    /// What kind of write this was.
    pub op: ChainOp,
    /// The resulting value after this write (`None` for a tombstone).
    pub value: Option<Value>,
}

/// The full version history of one key, newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chain {
    entries: Vec<ChainEntry>,
}

impl Chain {
    /// An empty chain (key does not exist yet).
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Appends a new version to the head of the chain.
    pub fn push(&mut self, entry: ChainEntry) {
        self.entries.push(entry);
    }

    /// The current (latest) value, or `None` if the chain is empty or the
    /// latest entry is a tombstone.
    pub fn latest(&self) -> Option<&Value> {
        self.entries.last().and_then(|e| e.value.as_ref())
    }

    /// The event id of the latest write, or `None` if the chain is empty.
    pub fn latest_event_id(&self) -> Option<EventId> {
        self.entries.last().map(|e| e.event_id)
    }

    /// Whether the key currently exists (latest entry is not a tombstone
    /// and the chain is non-empty).
    pub fn exists(&self) -> bool {
        self.latest().is_some()
    }

    /// The value as of a specific event id, by walking backwards from the
    /// head to the newest entry whose event happened-before or at
    /// `as_of` in ledger order. Returns `Err(NotFound)` if no such
    /// version exists (the key did not exist yet at that point).
    pub fn value_as_of(&self, as_of: EventId) -> Result<Option<&Value>> {
        for entry in self.entries.iter().rev() {
            if entry.event_id <= as_of {
                return Ok(entry.value.as_ref());
            }
        }
        Err(CredbError::NotFound)
    }

    /// All versions, newest first.
    pub fn history(&self) -> &[ChainEntry] {
        &self.entries
    }

    /// Whether the key has ever been written since a given event id
    /// (used by repeatable-read validation to detect an intervening
    /// write to a key a transaction previously read).
    pub fn written_since(&self, since: EventId) -> bool {
        self.entries.last().is_some_and(|e| e.event_id > since)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(event_id: EventId, value: i64) -> ChainEntry {
        ChainEntry {
            event_id,
            op: ChainOp::Put,
            value: Some(Value::new(serde_json::json!(value))),
        }
    }

    #[test]
    fn latest_reflects_most_recent_write() {
        let mut chain = Chain::new();
        chain.push(entry(EventId::new(0, 0, 1), 1));
        chain.push(entry(EventId::new(0, 0, 2), 2));
        assert_eq!(chain.latest().unwrap().0, serde_json::json!(2));
    }

    #[test]
    fn tombstone_makes_exists_false() {
        let mut chain = Chain::new();
        chain.push(entry(EventId::new(0, 0, 1), 1));
        chain.push(ChainEntry {
            event_id: EventId::new(0, 0, 2),
            op: ChainOp::Remove,
            value: None,
        });
        assert!(!chain.exists());
    }

    #[test]
    fn written_since_detects_intervening_write() {
        let mut chain = Chain::new();
        chain.push(entry(EventId::new(0, 0, 1), 1));
        assert!(!chain.written_since(EventId::new(0, 0, 1)));
        assert!(chain.written_since(EventId::new(0, 0, 0)));
    }

    #[test]
    fn value_as_of_walks_backwards() {
        let mut chain = Chain::new();
        chain.push(entry(EventId::new(0, 0, 1), 10));
        chain.push(entry(EventId::new(0, 0, 3), 30));
        let value = chain.value_as_of(EventId::new(0, 0, 2)).unwrap();
        assert_eq!(value.unwrap().0, serde_json::json!(10));
    }
}
