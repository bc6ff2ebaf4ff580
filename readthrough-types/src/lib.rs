//! Shared types for readthrough
//!
//! This crate provides the value types exchanged between the cache, the
//! templates that back it, and the consumers reading through it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Page used when a consumer has not chosen one
pub const DEFAULT_PAGE: u64 = 1;

/// Page size used when a consumer has not chosen one
pub const DEFAULT_PAGE_SIZE: u64 = 30;

/// Free-form query forwarded to a template
pub type ReadQuery = Map<String, Value>;

/// A single windowed read against a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub offset: u64,
    pub size: u64,
    #[serde(default)]
    pub query: ReadQuery,
}

/// Rows delivered by a template for a request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadResponse {
    pub data: Vec<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl ReadResponse {
    pub fn new(data: Vec<Value>) -> Self {
        Self { data, total: None }
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }
}

/// Fully resolved page, size and query for a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadOptionsData {
    pub page: u64,
    pub size: u64,
    #[serde(default)]
    pub query: ReadQuery,
}

impl ReadOptionsData {
    pub fn new(page: u64, size: u64) -> Self {
        Self {
            page,
            size,
            query: ReadQuery::new(),
        }
    }

    pub fn with_query(mut self, query: ReadQuery) -> Self {
        self.query = query;
        self
    }
}

impl Default for ReadOptionsData {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE, DEFAULT_PAGE_SIZE)
    }
}

/// Options as stored by an options group: any field may be unset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialReadOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<ReadQuery>,
}

impl PartialReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn query(mut self, query: ReadQuery) -> Self {
        self.query = Some(query);
        self
    }

    /// Overlay the fields set in `next` on top of `self`
    pub fn overlay(&self, next: &PartialReadOptions) -> PartialReadOptions {
        PartialReadOptions {
            page: next.page.or(self.page),
            size: next.size.or(self.size),
            query: next.query.clone().or_else(|| self.query.clone()),
        }
    }

    /// Fill unset fields from the given defaults
    pub fn resolve(&self, default_page: u64, default_size: u64) -> ReadOptionsData {
        ReadOptionsData {
            page: self.page.unwrap_or(default_page),
            size: self.size.unwrap_or(default_size),
            query: self.query.clone().unwrap_or_default(),
        }
    }

    /// JSON shape of the set fields, used for structural comparison
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(page) = self.page {
            map.insert("page".to_string(), Value::from(page));
        }
        if let Some(size) = self.size {
            map.insert("size".to_string(), Value::from(size));
        }
        if let Some(query) = &self.query {
            map.insert("query".to_string(), Value::Object(query.clone()));
        }
        Value::Object(map)
    }
}

impl From<ReadOptionsData> for PartialReadOptions {
    fn from(options: ReadOptionsData) -> Self {
        PartialReadOptions {
            page: Some(options.page),
            size: Some(options.size),
            query: Some(options.query),
        }
    }
}

/// Read state reported to consumers in meta mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadStatus {
    /// Value present
    Read,
    /// Requested, waiting on the template
    Reading,
    /// Never requested
    Unread,
}

/// One position of a window in meta mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceItem {
    pub value: Option<Value>,
    pub status: ReadStatus,
}

/// Aggregate state of a window in meta mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMeta {
    pub status: ReadStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A window with per-position status, as returned by the meta read modes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceWithMeta {
    pub data: Vec<ResourceItem>,
    pub meta: ResourceMeta,
}

impl ResourceWithMeta {
    /// Values of the positions that are present
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.data.iter().filter_map(|item| item.value.as_ref())
    }

    pub fn is_read(&self) -> bool {
        self.meta.status == ReadStatus::Read
    }
}
