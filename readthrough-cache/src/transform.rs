//! Field-name transforms between consumers and templates
//!
//! A [`TransformConfig`] maps the field names a consumer uses to the names a
//! template uses natively. Queries are rewritten outward → native before they
//! reach the template (and before cache keys are computed); rows are
//! rewritten native → outward on the way back.

use readthrough_types::ReadQuery;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

/// Mapping from external field names to native field names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformConfig(BTreeMap<String, String>);

impl TransformConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mapping from `external` to `native`
    pub fn map(mut self, external: impl Into<String>, native: impl Into<String>) -> Self {
        self.0.insert(external.into(), native.into());
        self
    }

    /// Native name for an external field, or the field itself when unmapped
    pub fn native_key<'a>(&'a self, external: &'a str) -> &'a str {
        self.0.get(external).map(String::as_str).unwrap_or(external)
    }

    /// Rewrite query keys outward → native
    pub fn query(&self, query: &ReadQuery) -> ReadQuery {
        query
            .iter()
            .map(|(key, value)| (self.native_key(key).to_string(), value.clone()))
            .collect()
    }

    /// Rewrite a row native → outward
    ///
    /// Configured fields are picked from their native names; fields that no
    /// mapping reads from pass through unchanged. Non-object rows are returned
    /// as they are.
    pub fn data(&self, item: &Value) -> Value {
        let Value::Object(source) = item else {
            return item.clone();
        };

        let mut out = Map::new();
        let mut consumed = HashSet::new();
        for (external, native) in &self.0 {
            if let Some(value) = source.get(native) {
                out.insert(external.clone(), value.clone());
            }
            consumed.insert(native.as_str());
        }

        for (key, value) in source {
            if !consumed.contains(key.as_str()) {
                out.insert(key.clone(), value.clone());
            }
        }

        Value::Object(out)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TransformConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        TransformConfig(
            iter.into_iter()
                .map(|(external, native)| (external.into(), native.into()))
                .collect(),
        )
    }
}
