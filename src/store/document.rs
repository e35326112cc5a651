//! The document value model (§2 Data model) and dot-path addressing.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{CredbError, Result};

/// A document value. A thin wrapper over a JSON-like tree so that
/// `serde_json` drives (de)serialization, while path addressing and
/// shallow merge stay CreDB-specific operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Value(pub Json);

impl Value {
    /// Wraps a `serde_json::Value`.
    pub fn new(json: Json) -> Self {
        Self(json)
    }

    /// An empty object, the canonical starting document.
    pub fn empty_object() -> Self {
        Self(Json::Object(serde_json::Map::new()))
    }

    /// Resolves a dot-separated path (`"a.b.2.c"`) against this value.
    /// Numeric segments index into arrays; other segments index into
    /// objects. Returns `None` if any segment is absent or of the wrong
    /// shape.
    pub fn get_path(&self, path: &str) -> Option<&Json> {
        let mut cursor = &self.0;
        if path.is_empty() {
            return Some(cursor);
        }
        for segment in path.split('.') {
            cursor = match cursor {
                Json::Object(map) => map.get(segment)?,
                Json::Array(arr) => {
                    let idx: usize = segment.parse().ok()?;
                    arr.get(idx)?
                }
                _ => return None,
            };
        }
        Some(cursor)
    }

    /// Sets the value at `path`, creating intermediate objects as needed.
    /// Fails if an intermediate segment exists but is not an object (array
    /// auto-vivification is not supported; arrays are only indexable, not
    /// growable, by path).
    pub fn set_path(&mut self, path: &str, value: Json) -> Result<()> {
        if path.is_empty() {
            self.0 = value;
            return Ok(());
        }
        let segments: Vec<&str> = path.split('.').collect();
        let mut cursor = &mut self.0;
        for segment in &segments[..segments.len() - 1] {
            if !matches!(cursor, Json::Object(_)) {
                return Err(CredbError::validation(format!(
                    "path segment [{segment}] is not addressable on a non-object"
                )));
            }
            let map = match cursor {
                Json::Object(map) => map,
                _ => unreachable!(),
            };
            cursor = map
                .entry(segment.to_string())
                .or_insert_with(|| Json::Object(serde_json::Map::new()));
        }
        let last = segments[segments.len() - 1];
        match cursor {
            Json::Object(map) => {
                map.insert(last.to_string(), value);
                Ok(())
            }
            Json::Array(arr) => {
                let idx: usize = last
                    .parse()
                    .map_err(|_| CredbError::validation(format!("not an array index: {last}")))?;
                if idx >= arr.len() {
                    return Err(CredbError::validation("array index out of bounds"));
                }
                arr[idx] = value;
                Ok(())
            }
            _ => Err(CredbError::validation("path does not resolve to a container")),
        }
    }

    /// Shallow-merges `patch`'s top-level object keys into `self`
    /// (the `add` operation, §2). Both sides must be objects.
    pub fn merge_shallow(&mut self, patch: &Value) -> Result<()> {
        let target = self
            .0
            .as_object_mut()
            .ok_or_else(|| CredbError::validation("add target is not an object"))?;
        let source = patch
            .0
            .as_object()
            .ok_or_else(|| CredbError::validation("add patch is not an object"))?;
        for (key, value) in source {
            target.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    /// Serializes to canonical JSON bytes (used for hashing/witness assembly).
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.0).expect("Value always serializes")
    }
}

/// A fully addressed document: the collection it lives in, its key, and
/// its current value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// The owning collection's name.
    pub collection: String,
    /// The document's key, unique within its collection.
    pub key: String,
    /// The document's current value.
    pub value: Value,
}

/// Validates a key against the `[A-Za-z0-9_-]+` key-naming rule (§2).
pub fn validate_key(key: &str) -> Result<()> {
    if !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        Ok(())
    } else {
        Err(CredbError::validation(format!("invalid key: {key}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_path_through_nested_maps() {
        let value = Value::new(json!({"a": {"b": {"c": 42}}}));
        assert_eq!(value.get_path("a.b.c"), Some(&json!(42)));
    }

    #[test]
    fn get_path_through_arrays() {
        let value = Value::new(json!({"a": [1, 2, {"b": 3}]}));
        assert_eq!(value.get_path("a.2.b"), Some(&json!(3)));
    }

    #[test]
    fn get_path_missing_segment_is_none() {
        let value = Value::new(json!({"a": 1}));
        assert_eq!(value.get_path("a.b"), None);
    }

    #[test]
    fn set_path_creates_intermediate_objects() {
        let mut value = Value::new(json!({}));
        value.set_path("a.b.c", json!(7)).unwrap();
        assert_eq!(value.get_path("a.b.c"), Some(&json!(7)));
    }

    #[test]
    fn merge_shallow_overwrites_top_level_keys_only() {
        let mut value = Value::new(json!({"a": 1, "b": {"x": 1}}));
        let patch = Value::new(json!({"b": {"y": 2}, "c": 3}));
        value.merge_shallow(&patch).unwrap();
        assert_eq!(value.0, json!({"a": 1, "b": {"y": 2}, "c": 3}));
    }

    #[test]
    fn rejects_invalid_keys() {
        assert!(validate_key("").is_err());
        assert!(validate_key("has space").is_err());
        assert!(validate_key("has/slash").is_err());
        assert!(validate_key("valid_key-123").is_ok());
    }
}
