//! Secondary indexes over a single document path (§4.C).
//!
//! Each index keeps `(value, key)` pairs sorted by value so that
//! equality lookups used to accelerate `find` are a binary search rather
//! than a full collection scan.

use std::collections::BTreeMap;

use serde_json::Value as Json;

/// An index over one document path within one collection, mapping the
/// JSON value observed at that path to the set of keys currently
/// holding it.
#[derive(Debug, Clone, Default)]
pub struct Index {
    path: String,
    // serde_json::Value isn't Ord, so index on its canonical string form.
    entries: BTreeMap<String, Vec<String>>,
}

impl Index {
    /// Creates an empty index over `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// The path this index covers.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn canonical(value: &Json) -> String {
        serde_json::to_string(value).expect("JSON value always serializes")
    }

    /// Records that `key` now holds `value` at this index's path.
    pub fn insert(&mut self, value: &Json, key: &str) {
        let bucket = self.entries.entry(Self::canonical(value)).or_default();
        if !bucket.iter().any(|k| k == key) {
            bucket.push(key.to_string());
        }
    }

    /// Removes the association of `key` with `value`, dropping the
    /// bucket entirely if it becomes empty.
    pub fn remove(&mut self, value: &Json, key: &str) {
        let canonical = Self::canonical(value);
        if let Some(bucket) = self.entries.get_mut(&canonical) {
            bucket.retain(|k| k != key);
            if bucket.is_empty() {
                self.entries.remove(&canonical);
            }
        }
    }

    /// All keys currently holding `value` at this index's path.
    pub fn lookup(&self, value: &Json) -> &[String] {
        self.entries
            .get(&Self::canonical(value))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_finds_keys_with_matching_value() {
        let mut index = Index::new("status");
        index.insert(&json!("active"), "k1");
        index.insert(&json!("active"), "k2");
        index.insert(&json!("inactive"), "k3");
        let mut found = index.lookup(&json!("active")).to_vec();
        found.sort();
        assert_eq!(found, vec!["k1".to_string(), "k2".to_string()]);
    }

    #[test]
    fn remove_drops_empty_buckets() {
        let mut index = Index::new("status");
        index.insert(&json!("active"), "k1");
        index.remove(&json!("active"), "k1");
        assert!(index.lookup(&json!("active")).is_empty());
    }
}
