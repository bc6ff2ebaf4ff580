//! A cache consumer wired to the configured data file.

use crate::config::Config;
use crate::source::DelayedTemplate;
use anyhow::{bail, Context, Result};
use readthrough_cache::{
    Consumer, Invalidator, MemoryTemplate, ResourceCache, ResourceTemplate, Template,
};
use readthrough_types::{ReadOptionsData, ReadQuery, ResourceWithMeta};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::debug;

pub struct Session {
    pub config: Config,
    pub cache: ResourceCache,
    consumer: Consumer,
    template: ResourceTemplate,
    invalidated: Arc<Notify>,
}

impl Session {
    pub fn open(config_path: &Path) -> Result<Self> {
        let config = Config::from_file(config_path).context("Failed to load configuration")?;
        let rows = config.load_rows().context("Failed to load data")?;
        debug!(rows = rows.len(), path = %config.data_path().display(), "loaded data");

        let source = DelayedTemplate::new(
            MemoryTemplate::new(config.id_key.clone(), rows).with_mode(config.filter),
            Duration::from_millis(config.latency_ms),
            Handle::current(),
        );
        let mut template = ResourceTemplate::fixed(Arc::new(source) as Arc<dyn Template>);
        if let Some(transform) = &config.transform {
            template = template.with_transform(transform.clone());
        }

        let cache = ResourceCache::with_config(config.cache.clone());
        let invalidated = Arc::new(Notify::new());
        let waker = invalidated.clone();
        let consumer = cache.consumer("readthrough", Invalidator::new(move || waker.notify_one()));

        Ok(Session {
            config,
            cache,
            consumer,
            template,
            invalidated,
        })
    }

    /// Read options for a page, defaulting the size from the cache config
    pub fn options(&self, page: u64, size: Option<u64>, query: ReadQuery) -> ReadOptionsData {
        let size = size.unwrap_or(self.config.cache.default_page_size);
        ReadOptionsData::new(page, size).with_query(query)
    }

    /// Read a page, waiting for invalidations until it is available
    pub async fn resolve(&self, options: &ReadOptionsData) -> Result<Vec<Value>> {
        loop {
            if let Some(rows) = self
                .consumer
                .get_or_read(&self.template, options)
                .context("Failed to read page")?
            {
                return Ok(rows);
            }
            debug!(page = options.page, "waiting for page");
            self.invalidated.notified().await;
        }
    }

    /// Per-position status of a page, without reading
    pub fn meta(&self, options: &ReadOptionsData) -> Result<ResourceWithMeta> {
        self.consumer
            .get_meta(&self.template, options)
            .context("Failed to inspect page")
    }
}

/// Parse `key=value` pairs into a query
///
/// Values that parse as JSON keep their type; anything else is a string.
pub fn parse_query(pairs: &[String]) -> Result<ReadQuery> {
    let mut query = ReadQuery::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("Invalid query `{}`, expected key=value", pair);
        };
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        query.insert(key.to_string(), value);
    }
    Ok(query)
}
