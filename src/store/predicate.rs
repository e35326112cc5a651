//! Equality predicates used by `check` and `find` (§4.C).

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::store::document::Value;

/// A single `path == value` condition. `find`/`check` match a document
/// when every predicate in the set holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    /// Dot-separated path into the document.
    pub path: String,
    /// The value the path must equal.
    pub expected: Json,
}

impl Predicate {
    /// Builds an equality predicate.
    pub fn eq(path: impl Into<String>, expected: Json) -> Self {
        Self {
            path: path.into(),
            expected,
        }
    }

    /// Whether `value` satisfies this predicate.
    pub fn matches(&self, value: &Value) -> bool {
        value.get_path(&self.path) == Some(&self.expected)
    }
}

/// A conjunction of predicates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredicateSet {
    predicates: Vec<Predicate>,
}

impl PredicateSet {
    /// An empty predicate set, satisfied by every document (used by
    /// `find` with no filter).
    pub fn all() -> Self {
        Self::default()
    }

    /// Builds a predicate set from its conjuncts.
    pub fn new(predicates: Vec<Predicate>) -> Self {
        Self { predicates }
    }

    /// Whether `value` satisfies every predicate in this set.
    pub fn matches(&self, value: &Value) -> bool {
        self.predicates.iter().all(|p| p.matches(value))
    }

    /// The predicates backing this set.
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }
}
