//! Collection metadata (§2 Data model).

use serde::{Deserialize, Serialize};

/// Metadata about one collection: its name and which document paths have
/// a secondary index built over them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionMeta {
    /// The collection's name.
    pub name: String,
    /// Dot-separated paths with a secondary index.
    pub indexed_paths: Vec<String>,
}

impl CollectionMeta {
    /// Creates metadata for a fresh, unindexed collection.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexed_paths: Vec::new(),
        }
    }

    /// Whether `path` has a secondary index.
    pub fn is_indexed(&self, path: &str) -> bool {
        self.indexed_paths.iter().any(|p| p == path)
    }

    /// Registers a new indexed path, if not already present.
    pub fn add_index(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.is_indexed(&path) {
            self.indexed_paths.push(path);
        }
    }
}
