//! Canonical cache keys
//!
//! Request keys, template option keys and synthetic ids are all derived from a
//! canonical JSON rendering with sorted object keys, so two queries that only
//! differ in key order address the same cache entries.

use blake3::Hasher;
use readthrough_types::{ReadQuery, ReadRequest};
use serde_json::Value;
use std::fmt;

/// Render a JSON value with object keys in sorted order
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

/// Render a query object with keys in sorted order
pub fn canonical_query(query: &ReadQuery) -> String {
    let mut out = String::new();
    write_object(query, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_object(map, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_object(map: &serde_json::Map<String, Value>, out: &mut String) {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    out.push('{');
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_value(value, out);
    }
    out.push('}');
}

/// A cache key based on content hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentKey {
    /// Blake3 hash of the key components
    pub content_hash: [u8; 32],
}

impl ContentKey {
    /// Create a key from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(bytes);
        ContentKey {
            content_hash: *hasher.finalize().as_bytes(),
        }
    }

    /// Create the key of a read request
    ///
    /// This combines offset, size and the canonical query
    pub fn for_request(request: &ReadRequest) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(&request.offset.to_le_bytes());
        hasher.update(&request.size.to_le_bytes());
        hasher.update(canonical_query(&request.query).as_bytes());
        ContentKey {
            content_hash: *hasher.finalize().as_bytes(),
        }
    }

    /// Create the key of a template's construction options
    pub fn for_options(options: &Value) -> Self {
        Self::from_bytes(canonical_json(options).as_bytes())
    }

    /// Get the hash as a hex string
    pub fn to_hex(&self) -> String {
        self.content_hash
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // short form is enough for log lines
        write!(f, "{}", &self.to_hex()[..12])
    }
}

/// Identifies one position within one query's result ordering
///
/// The id is `canonical(query)/position`; it names a slot, not an item, and is
/// stable for as long as the query and position are.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyntheticId(String);

impl SyntheticId {
    /// Build the id from a canonical query rendering and an absolute position
    pub fn new(query_key: &str, position: u64) -> Self {
        SyntheticId(format!("{}/{}", query_key, position))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Absolute position encoded in the id
    pub fn position(&self) -> Option<u64> {
        self.0
            .rsplit_once('/')
            .and_then(|(_, position)| position.parse().ok())
    }
}

impl fmt::Display for SyntheticId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
