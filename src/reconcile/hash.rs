//! Canonical content hashing
//!
//! The stored hash decides whether a mirror is up to date, so it must not
//! depend on how a store happened to order JSON keys.

use crate::model::SourceIssue;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

/// Fields that take part in change detection
#[derive(Debug, Clone, Copy)]
pub struct HashInput<'a> {
    pub id: &'a str,
    pub updated: &'a str,
    pub summary: &'a str,
    pub status: &'a str,
    pub parent: Option<&'a str>,
    pub hierarchy_level: Option<&'a str>,
}

impl<'a> HashInput<'a> {
    pub fn from_issue(
        issue: &'a SourceIssue,
        parent: Option<&'a str>,
        hierarchy_level: Option<&'a str>,
    ) -> Self {
        Self {
            id: &issue.id,
            updated: &issue.updated,
            summary: &issue.summary,
            status: &issue.status,
            parent,
            hierarchy_level,
        }
    }

    fn to_value(self) -> Value {
        json!({
            "id": self.id,
            "updated": self.updated,
            "summary": self.summary,
            "status": self.status,
            "parent": self.parent,
            "hierarchy_level": self.hierarchy_level,
        })
    }
}

/// Hash of the canonical field tuple
pub fn content_hash(input: HashInput<'_>) -> String {
    canonical_hash(&input.to_value())
}

/// SHA-256 (hex) of a JSON value serialized with keys sorted at every level
pub fn canonical_hash(value: &Value) -> String {
    let canonical = canonicalize(value);
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash of a comment body as it will be compared across stores
pub fn comment_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.trim().as_bytes());
    hex::encode(hasher.finalize())
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
