//! Per-shard document storage: a key -> chain map plus secondary
//! indexes, scoped by collection (§4.C).

use std::collections::HashMap;

use serde_json::Value as Json;

use crate::error::{CredbError, Result};
use crate::ledger::event::EventId;
use crate::store::chain::{Chain, ChainEntry, ChainOp};
use crate::store::collection::CollectionMeta;
use crate::store::document::{validate_key, Value};
use crate::store::index::Index;
use crate::store::predicate::PredicateSet;

#[derive(Default)]
struct CollectionState {
    meta: CollectionMeta,
    chains: HashMap<String, Chain>,
    indexes: HashMap<String, Index>,
}

/// The document store for a single shard: every collection's chains and
/// indexes, addressed by `(collection, key)`.
#[derive(Default)]
pub struct ShardStore {
    collections: HashMap<String, CollectionState>,
}

impl ShardStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn collection_mut(&mut self, collection: &str) -> &mut CollectionState {
        self.collections.entry(collection.to_string()).or_insert_with(|| CollectionState {
            meta: CollectionMeta::new(collection),
            ..Default::default()
        })
    }

    /// Whether `key` currently exists (and is not a tombstone) in `collection`.
    pub fn has(&self, collection: &str, key: &str) -> bool {
        self.collections
            .get(collection)
            .and_then(|c| c.chains.get(key))
            .is_some_and(Chain::exists)
    }

    /// Whether `key` exists in `collection` and its current value
    /// satisfies `predicates`.
    pub fn check(&self, collection: &str, key: &str, predicates: &PredicateSet) -> bool {
        self.get(collection, key)
            .map(|value| predicates.matches(&value))
            .unwrap_or(false)
    }

    /// The current value of `key` in `collection`, if it exists.
    pub fn get(&self, collection: &str, key: &str) -> Option<Value> {
        self.collections
            .get(collection)?
            .chains
            .get(key)?
            .latest()
            .cloned()
    }

    /// The most recent write event id for `key`, if any.
    pub fn latest_event_id(&self, collection: &str, key: &str) -> Option<EventId> {
        self.collections.get(collection)?.chains.get(key)?.latest_event_id()
    }

    /// Full version history of `key`, newest first.
    pub fn history(&self, collection: &str, key: &str) -> Vec<ChainEntry> {
        self.collections
            .get(collection)
            .and_then(|c| c.chains.get(key))
            .map(|chain| chain.history().to_vec())
            .unwrap_or_default()
    }

    /// Every key in `collection` whose current value satisfies `predicates`.
    pub fn find(&self, collection: &str, predicates: &PredicateSet) -> Vec<String> {
        let Some(state) = self.collections.get(collection) else {
            return Vec::new();
        };
        // Use an index when the predicate set is a single indexed equality,
        // otherwise fall back to a full scan.
        if let [pred] = predicates.predicates() {
            if let Some(index) = state.indexes.get(&pred.path) {
                return index.lookup(&pred.expected).to_vec();
            }
        }
        state
            .chains
            .iter()
            .filter(|(_, chain)| chain.latest().is_some_and(|v| predicates.matches(v)))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Registers a secondary index over `path` in `collection`, backfilling
    /// it from every existing document.
    pub fn create_index(&mut self, collection: &str, path: &str) {
        let state = self.collection_mut(collection);
        if state.meta.is_indexed(path) {
            return;
        }
        state.meta.add_index(path);
        self.rebuild_index(collection, path);
    }

    /// Drops a previously declared secondary index.
    pub fn drop_index(&mut self, collection: &str, path: &str) {
        if let Some(state) = self.collections.get_mut(collection) {
            state.meta.indexed_paths.retain(|p| p != path);
            state.indexes.remove(path);
        }
    }

    fn rebuild_index(&mut self, collection: &str, path: &str) {
        let state = self.collection_mut(collection);
        let mut index = Index::new(path);
        for (key, chain) in &state.chains {
            if let Some(value) = chain.latest() {
                if let Some(indexed) = value.get_path(path) {
                    index.insert(indexed, key);
                }
            }
        }
        state.indexes.insert(path.to_string(), index);
    }

    /// Every collection name currently known to this shard's store.
    pub fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    /// Every `(key, chain)` pair in `collection`, for full export
    /// (`DumpEverything`).
    pub fn chains(&self, collection: &str) -> Vec<(String, Chain)> {
        self.collections
            .get(collection)
            .map(|c| c.chains.iter().map(|(k, chain)| (k.clone(), chain.clone())).collect())
            .unwrap_or_default()
    }

    /// The indexed paths declared on `collection`.
    pub fn indexed_paths_of(&self, collection: &str) -> Vec<String> {
        self.collections
            .get(collection)
            .map(|c| c.meta.indexed_paths.clone())
            .unwrap_or_default()
    }

    /// Replaces this store's entire contents (full import,
    /// `LoadEverything`). Indexes are rebuilt from each collection's
    /// declared indexed paths after every chain has been restored.
    pub fn load_all(&mut self, collections: Vec<(String, Vec<String>, Vec<(String, Chain)>)>) {
        self.collections.clear();
        for (name, indexed_paths, chains) in &collections {
            let state = self.collection_mut(name);
            for (key, chain) in chains {
                state.chains.insert(key.clone(), chain.clone());
            }
            for path in indexed_paths {
                state.meta.add_index(path.clone());
            }
        }
        for (name, indexed_paths, _) in &collections {
            for path in indexed_paths {
                self.rebuild_index(name, path);
            }
        }
    }

    fn index_value(state: &mut CollectionState, key: &str, old: Option<&Value>, new: Option<&Value>) {
        let paths: Vec<String> = state.indexes.keys().cloned().collect();
        for path in paths {
            let index = state.indexes.get_mut(&path).expect("path came from indexes keys");
            if let Some(old) = old {
                if let Some(v) = old.get_path(&path) {
                    index.remove(v, key);
                }
            }
            if let Some(new) = new {
                if let Some(v) = new.get_path(&path) {
                    index.insert(v, key);
                }
            }
        }
    }

    /// Applies a full-value `put`, appending `event_id` to the key's chain.
    pub fn apply_put(&mut self, collection: &str, key: &str, value: Value, event_id: EventId) -> Result<()> {
        validate_key(key)?;
        let state = self.collection_mut(collection);
        let old = state.chains.get(key).and_then(Chain::latest).cloned();
        let chain = state.chains.entry(key.to_string()).or_insert_with(Chain::new);
        chain.push(ChainEntry {
            event_id,
            op: ChainOp::Put,
            value: Some(value.clone()),
        });
        Self::index_value(state, key, old.as_ref(), Some(&value));
        Ok(())
    }

    /// Applies a shallow-merge `add`. Fails if the key does not already
    /// exist (use `apply_put` to create it first).
    pub fn apply_add(&mut self, collection: &str, key: &str, patch: &Value, event_id: EventId) -> Result<Value> {
        let state = self.collection_mut(collection);
        let chain = state
            .chains
            .get_mut(key)
            .ok_or(CredbError::NotFound)?;
        let mut merged = chain.latest().cloned().ok_or(CredbError::NotFound)?;
        let old = merged.clone();
        merged.merge_shallow(patch)?;
        chain.push(ChainEntry {
            event_id,
            op: ChainOp::Add,
            value: Some(merged.clone()),
        });
        Self::index_value(state, key, Some(&old), Some(&merged));
        Ok(merged)
    }

    /// Applies a `remove`, appending a tombstone to the key's chain.
    pub fn apply_remove(&mut self, collection: &str, key: &str, event_id: EventId) -> Result<()> {
        let state = self.collection_mut(collection);
        let chain = state
            .chains
            .get_mut(key)
            .ok_or(CredbError::NotFound)?;
        let old = chain.latest().cloned();
        chain.push(ChainEntry {
            event_id,
            op: ChainOp::Remove,
            value: None,
        });
        Self::index_value(state, key, old.as_ref(), None);
        Ok(())
    }

    /// A value-level diff between two versions of a key: keys present in
    /// `to` with a different value than in `from` (or newly present),
    /// and keys present in `from` but absent from `to`. Only meaningful
    /// for object-valued documents.
    pub fn diff(&self, collection: &str, key: &str, from: EventId, to: EventId) -> Result<DocumentDiff> {
        let chain = self
            .collections
            .get(collection)
            .and_then(|c| c.chains.get(key))
            .ok_or(CredbError::NotFound)?;
        let from_value = chain.value_as_of(from)?;
        let to_value = chain.value_as_of(to)?;
        Ok(DocumentDiff::between(from_value, to_value))
    }
}

/// A shallow key-level diff between two document versions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentDiff {
    /// Keys added or changed in `to` relative to `from`.
    pub changed: Vec<(String, Json)>,
    /// Keys present in `from` but absent from `to`.
    pub removed: Vec<String>,
}

impl DocumentDiff {
    fn between(from: Option<&Value>, to: Option<&Value>) -> Self {
        let from_map = from.and_then(|v| v.0.as_object());
        let to_map = to.and_then(|v| v.0.as_object());
        let mut changed = Vec::new();
        let mut removed = Vec::new();
        if let Some(to_map) = to_map {
            for (k, v) in to_map {
                let unchanged = from_map.and_then(|m| m.get(k)) == Some(v);
                if !unchanged {
                    changed.push((k.clone(), v.clone()));
                }
            }
        }
        if let Some(from_map) = from_map {
            for k in from_map.keys() {
                let still_present = to_map.is_some_and(|m| m.contains_key(k));
                if !still_present {
                    removed.push(k.clone());
                }
            }
        }
        Self { changed, removed }
    }
}
