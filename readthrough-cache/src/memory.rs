//! In-memory templates
//!
//! A [`MemoryTemplate`] serves an array of rows held in memory: it filters by
//! the request's query with [`default_filter`], slices out the requested
//! window and reports the filtered total.

use crate::error::ReadError;
use crate::template::{ResourceTemplate, Template, TemplateControls, TemplateFactory};
use readthrough_types::{ReadQuery, ReadRequest, ReadResponse};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// How string query values match string fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// Case-insensitive substring
    #[default]
    Contains,
    /// Case-insensitive prefix
    StartsWith,
    /// Plain equality
    Exact,
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// Whether `item` matches every query field
///
/// Null, false, zero and empty-string query values match everything. Strings
/// are compared according to `mode`, anything else by equality.
pub fn default_filter(query: &ReadQuery, item: &Value, mode: FilterMode) -> bool {
    query.iter().all(|(key, expected)| {
        if is_falsy(expected) {
            return true;
        }
        let actual = item.get(key).unwrap_or(&Value::Null);
        match (actual, expected, mode) {
            (Value::String(actual), Value::String(expected), FilterMode::Contains) => actual
                .to_lowercase()
                .contains(&expected.to_lowercase()),
            (Value::String(actual), Value::String(expected), FilterMode::StartsWith) => actual
                .to_lowercase()
                .starts_with(&expected.to_lowercase()),
            _ => actual == expected,
        }
    })
}

/// Template over an in-memory array
#[derive(Debug, Clone)]
pub struct MemoryTemplate {
    id_key: String,
    mode: FilterMode,
    data: Result<Vec<Value>, ReadError>,
}

impl MemoryTemplate {
    pub fn new(id_key: impl Into<String>, data: Vec<Value>) -> Self {
        MemoryTemplate {
            id_key: id_key.into(),
            mode: FilterMode::default(),
            data: Ok(data),
        }
    }

    /// Build from construction options of the form `{ "data": [...] }`
    pub fn from_options(id_key: impl Into<String>, mode: FilterMode, options: &Value) -> Self {
        let data = match options.get("data") {
            Some(Value::Array(rows)) => Ok(rows.clone()),
            Some(_) => Err(ReadError::InvalidOptions("`data` must be an array".to_string())),
            None => Err(ReadError::InvalidOptions("missing `data`".to_string())),
        };
        MemoryTemplate {
            id_key: id_key.into(),
            mode,
            data,
        }
    }

    pub fn with_mode(mut self, mode: FilterMode) -> Self {
        self.mode = mode;
        self
    }

    /// Answer a request from the held rows
    pub fn respond(&self, request: &ReadRequest) -> Result<ReadResponse, ReadError> {
        let rows = self.data.as_ref().map_err(|err| err.clone())?;
        let filtered: Vec<&Value> = if request.query.is_empty() {
            rows.iter().collect()
        } else {
            rows.iter()
                .filter(|row| !row.is_null() && default_filter(&request.query, row, self.mode))
                .collect()
        };

        let total = filtered.len() as u64;
        let data = filtered
            .into_iter()
            .skip(request.offset as usize)
            .take(request.size as usize)
            .cloned()
            .collect();
        Ok(ReadResponse::new(data).with_total(total))
    }
}

impl Template for MemoryTemplate {
    fn id_key(&self) -> &str {
        &self.id_key
    }

    fn read(&self, request: ReadRequest, controls: TemplateControls) -> Result<(), ReadError> {
        let response = self.respond(&request)?;
        controls.put(response);
        Ok(())
    }
}

/// Factory building memory templates for one id key
#[derive(Debug, Clone)]
pub struct MemoryFactory {
    id_key: String,
    mode: FilterMode,
}

impl MemoryFactory {
    pub fn new(id_key: impl Into<String>) -> Self {
        MemoryFactory {
            id_key: id_key.into(),
            mode: FilterMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: FilterMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn id_key(&self) -> &str {
        &self.id_key
    }

    /// Resource template serving `data` through this factory
    pub fn template(self: &Arc<Self>, data: Vec<Value>) -> ResourceTemplate {
        ResourceTemplate::new(self.clone(), json!({ "data": data }))
    }
}

impl TemplateFactory for MemoryFactory {
    fn create(&self, options: &Value) -> Arc<dyn Template> {
        Arc::new(MemoryTemplate::from_options(
            self.id_key.clone(),
            self.mode,
            options,
        ))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Resource template over an in-memory array, keyed by `id_key`
pub fn memory_template(id_key: impl Into<String>, data: Vec<Value>) -> ResourceTemplate {
    Arc::new(MemoryFactory::new(id_key)).template(data)
}
