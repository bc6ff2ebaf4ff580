//! Readthrough Resource Cache
//!
//! This crate provides a pagination-aware, read-through cache that sits
//! between UI consumers and pluggable data sources ("templates"). It resolves
//! windowed reads against a template, deduplicates in-flight requests, tracks
//! the resolution status of every position and invalidates exactly the
//! consumers whose data changed.
//!
//! # Architecture
//!
//! Each distinct template configuration gets its own pair of caches:
//!
//! - the **raw item cache** maps positions (synthetic ids) to items (natural
//!   ids) and drives subscriber notification
//! - the **request cache** records which reads are in flight and the last
//!   total reported for them
//!
//! Consumers read through a [`Consumer`] handed out by the shared
//! [`ResourceCache`], and share page/size/query state through
//! [`ReadOptions`] groups.
//!
//! ## Key Features
//!
//! - **Positional identity**: a position's id is stable across re-reads
//! - **At-most-one fetch**: identical windows never issue concurrent reads
//! - **Notify once**: a consumer is invalidated once all positions it waits on
//!   have been answered
//! - **Orphaning**: positions a shrunken result no longer covers are demoted
//!   instead of served stale
//!
//! # Example
//!
//! ```rust
//! use readthrough_cache::{memory_template, Invalidator, ResourceCache};
//! use readthrough_types::ReadOptionsData;
//! use serde_json::json;
//!
//! let cache = ResourceCache::new();
//! let consumer = cache.consumer("list", Invalidator::noop());
//! let template = memory_template("id", vec![json!({ "id": 1 }), json!({ "id": 2 })]);
//!
//! let page = consumer
//!     .get_or_read(&template, &ReadOptionsData::new(1, 2))
//!     .unwrap();
//! assert_eq!(page.map(|rows| rows.len()), Some(2));
//! ```

#![warn(missing_debug_implementations)]

// Core modules
pub mod config;
pub mod error;
pub mod invalidator;
pub mod keys;
pub mod metrics;
pub mod options;
pub mod raw;
pub mod registry;
pub mod request;
pub mod resource;
pub mod template;
pub mod transform;
mod window;

// Templates
pub mod memory;

// Re-export main types
pub use config::CacheConfig;
pub use error::{ReadError, ResourceError};
pub use invalidator::{Invalidator, Notifications};
pub use keys::{canonical_json, canonical_query, ContentKey, SyntheticId};
pub use memory::{default_filter, memory_template, FilterMode, MemoryFactory, MemoryTemplate};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use options::{changed, shallow_merge, MergeFn, OptionsCache, ReadOptions};
pub use raw::{CacheStatus, RawCacheItem, RawItemCache};
pub use registry::{TemplateCaches, TemplateRegistry};
pub use request::{RequestCache, RequestCacheEntry};
pub use resource::{Consumer, Resource, ResourceCache, ResourceProperty};
pub use template::{ResourceTemplate, Template, TemplateControls, TemplateFactory, TemplateRef};
pub use transform::TransformConfig;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        memory_template, shallow_merge, Consumer, Invalidator, ReadError, Resource, ResourceCache,
        ResourceError, ResourceTemplate, Template, TemplateControls, TemplateFactory,
    };
    pub use readthrough_types::{
        PartialReadOptions, ReadOptionsData, ReadRequest, ReadResponse, ReadStatus,
    };
}
