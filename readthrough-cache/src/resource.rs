//! Resource façade
//!
//! [`ResourceCache`] is the one cache manager of an application: it owns the
//! template registry, the options groups and the metrics. Each UI consumer
//! reads through its own [`Consumer`], which carries the consumer's id and
//! invalidator and cleans up after it when dropped.

use crate::config::CacheConfig;
use crate::error::ResourceError;
use crate::invalidator::Invalidator;
use crate::memory::MemoryFactory;
use crate::metrics::{CacheMetrics, MetricsSnapshot};
use crate::options::{MergeFn, OptionsCache, ReadOptions};
use crate::registry::{TemplateCaches, TemplateRegistry};
use crate::template::ResourceTemplate;
use crate::window::{self, Scan, Window};
use parking_lot::Mutex;
use readthrough_types::{ReadOptionsData, ResourceWithMeta};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// A template together with the options group driving it
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub template: ResourceTemplate,
    pub options: Option<ReadOptions>,
}

impl Resource {
    pub fn new(template: ResourceTemplate) -> Self {
        Resource {
            template,
            options: None,
        }
    }

    pub fn with_options(mut self, options: ReadOptions) -> Self {
        self.options = Some(options);
        self
    }
}

/// What a consumer can be handed as its resource
#[derive(Debug, Clone)]
pub enum ResourceProperty {
    /// A resource built elsewhere
    Resource(Resource),

    /// Plain rows, served by an in-memory template
    Data {
        id: String,
        id_key: String,
        data: Vec<Value>,
    },
}

impl From<Resource> for ResourceProperty {
    fn from(resource: Resource) -> Self {
        ResourceProperty::Resource(resource)
    }
}

impl From<ResourceTemplate> for ResourceProperty {
    fn from(template: ResourceTemplate) -> Self {
        ResourceProperty::Resource(Resource::new(template))
    }
}

struct CacheInner {
    config: CacheConfig,
    registry: TemplateRegistry,
    options: OptionsCache,
    metrics: Arc<CacheMetrics>,
    next_consumer: AtomicU64,
}

/// The cache manager shared by every consumer
#[derive(Clone)]
pub struct ResourceCache {
    inner: Arc<CacheInner>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Self {
        let options = OptionsCache::new(config.options_defaults());
        ResourceCache {
            inner: Arc::new(CacheInner {
                config,
                registry: TemplateRegistry::new(),
                options,
                metrics: Arc::new(CacheMetrics::new()),
                next_consumer: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Register a consumer
    ///
    /// `id` doubles as the consumer's default options group.
    pub fn consumer(&self, id: impl Into<String>, invalidator: Invalidator) -> Consumer {
        let id = id.into();
        debug!(consumer = %id, "consumer attached");
        Consumer {
            id,
            invalidator,
            cache: self.clone(),
            state: Mutex::new(ConsumerState::default()),
        }
    }

    /// Register a consumer with a generated id
    pub fn consumer_auto(&self, invalidator: Invalidator) -> Consumer {
        let n = self.inner.next_consumer.fetch_add(1, Ordering::Relaxed);
        self.consumer(format!("consumer-{}", n), invalidator)
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.inner.registry
    }

    pub fn options_cache(&self) -> &OptionsCache {
        &self.inner.options
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Drop every template instance, cached row and options group
    pub fn clear(&self) {
        info!(
            instances = self.inner.registry.len(),
            groups = self.inner.options.len(),
            "clearing resource cache"
        );
        self.inner.registry.clear();
        self.inner.options.clear();
        self.inner.metrics.reset();
    }

    fn caches(
        &self,
        template: Option<&ResourceTemplate>,
    ) -> Result<Arc<TemplateCaches>, ResourceError> {
        self.inner.registry.get_or_create(template)
    }
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCache")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .field("options", &self.inner.options)
            .finish()
    }
}

#[derive(Default)]
struct ConsumerState {
    owned_groups: Vec<String>,
    borrowed: Vec<ReadOptions>,
    bound: Option<Resource>,
    memory_factories: HashMap<String, Arc<MemoryFactory>>,
    destroyed: bool,
}

/// One consumer's view of the cache
pub struct Consumer {
    id: String,
    invalidator: Invalidator,
    cache: ResourceCache,
    state: Mutex<ConsumerState>,
}

impl Consumer {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn invalidator(&self) -> &Invalidator {
        &self.invalidator
    }

    /// Rows of a window, reading them through the template when missing
    ///
    /// Returns `Ok(None)` while the window is loading; the consumer's
    /// invalidator fires once every missing position has been answered.
    pub fn get_or_read<'a>(
        &self,
        template: impl Into<Option<&'a ResourceTemplate>>,
        options: &ReadOptionsData,
    ) -> Result<Option<Vec<Value>>, ResourceError> {
        let template = template.into();
        let (caches, window) = self.window(template, options)?;
        let transform = template.and_then(ResourceTemplate::transform);

        let scan = window::read_through(
            &caches,
            &window,
            &self.invalidator,
            &self.cache.inner.metrics,
            false,
        )?;
        Ok(scan.and_then(|scan| scan.into_values(transform)))
    }

    /// Like [`get_or_read`](Self::get_or_read), with per-position status
    ///
    /// Always yields one entry per position of the window.
    pub fn get_or_read_meta<'a>(
        &self,
        template: impl Into<Option<&'a ResourceTemplate>>,
        options: &ReadOptionsData,
    ) -> Result<ResourceWithMeta, ResourceError> {
        let template = template.into();
        let (caches, window) = self.window(template, options)?;
        let transform = template.and_then(ResourceTemplate::transform);

        let scan = match window::read_through(
            &caches,
            &window,
            &self.invalidator,
            &self.cache.inner.metrics,
            true,
        )? {
            Some(scan) => scan,
            None => window::peek(&caches, &window),
        };
        Ok(scan.into_meta(transform))
    }

    /// Rows of a window as far as they are cached, without reading
    ///
    /// Returns `Ok(None)` while the window's request is in flight, otherwise
    /// one entry per position.
    pub fn get<'a>(
        &self,
        template: impl Into<Option<&'a ResourceTemplate>>,
        options: &ReadOptionsData,
    ) -> Result<Option<Vec<Option<Value>>>, ResourceError> {
        let template = template.into();
        let (caches, window) = self.window(template, options)?;
        if caches.requests.is_inflight(&window.key) {
            return Ok(None);
        }

        let transform = template.and_then(ResourceTemplate::transform);
        Ok(Some(
            window::peek(&caches, &window).into_optional_values(transform),
        ))
    }

    /// Like [`get`](Self::get), with per-position status
    pub fn get_meta<'a>(
        &self,
        template: impl Into<Option<&'a ResourceTemplate>>,
        options: &ReadOptionsData,
    ) -> Result<ResourceWithMeta, ResourceError> {
        let template = template.into();
        let (caches, window) = self.window(template, options)?;
        let transform = template.and_then(ResourceTemplate::transform);
        let scan: Scan = window::peek(&caches, &window);
        Ok(scan.into_meta(transform))
    }

    /// Get or create an options group
    ///
    /// Without a group id the consumer's own id is used. A group created here
    /// is removed when this consumer is torn down; joining an existing group
    /// subscribes this consumer to it until then.
    pub fn create_options(&self, merge: MergeFn, group: Option<&str>) -> ReadOptions {
        let group = group.unwrap_or(&self.id);
        let (options, created) = self
            .cache
            .inner
            .options
            .create(group, &self.invalidator, merge);

        let mut state = self.state.lock();
        if created {
            state.owned_groups.push(group.to_string());
        } else if !state.owned_groups.iter().any(|owned| owned == group) {
            options.subscribe(&self.invalidator);
            if !state.borrowed.contains(&options) {
                state.borrowed.push(options.clone());
            }
        }
        options
    }

    /// Current options of a group, subscribing this consumer to it
    pub fn options(&self, options: &ReadOptions) -> ReadOptionsData {
        options.current_for(&self.invalidator)
    }

    /// Bind the resource this consumer was handed
    ///
    /// Invalidates the consumer when the template or options group differ
    /// from the previously bound resource. An options group created by another
    /// consumer gets this consumer as a subscriber. Plain rows are wrapped in
    /// an in-memory template, one factory per id key.
    pub fn bind_resource(&self, property: Option<ResourceProperty>) -> Option<Resource> {
        let property = property?;

        let (next, is_changed) = {
            let mut state = self.state.lock();
            let next = match property {
                ResourceProperty::Resource(resource) => resource,
                ResourceProperty::Data { id, id_key, data } => {
                    let factory = state
                        .memory_factories
                        .entry(id_key.clone())
                        .or_insert_with(|| Arc::new(MemoryFactory::new(id_key)))
                        .clone();
                    let template = ResourceTemplate::new(factory, json!({ "id": id, "data": data }));
                    Resource::new(template)
                }
            };

            if let Some(options) = &next.options {
                if self.cache.inner.options.owner_of(options).is_some()
                    && !state.owned_groups.iter().any(|group| group == options.group())
                    && !state.borrowed.contains(options)
                {
                    options.subscribe(&self.invalidator);
                    state.borrowed.push(options.clone());
                }
            }

            let is_changed = state.bound.as_ref() != Some(&next);
            state.bound = Some(next.clone());
            (next, is_changed)
        };

        if is_changed {
            debug!(consumer = %self.id, "bound resource changed");
            self.invalidator.invalidate();
        }
        Some(next)
    }

    /// Tear the consumer down
    ///
    /// Removes the options groups it created, leaves the groups it joined and
    /// drops its pending position subscriptions. Runs at most once; dropping
    /// the consumer calls it too.
    pub fn destroy(&self) {
        let (owned, borrowed) = {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.bound = None;
            (
                std::mem::take(&mut state.owned_groups),
                std::mem::take(&mut state.borrowed),
            )
        };

        for group in &owned {
            self.cache.inner.options.remove(group);
        }
        for options in &borrowed {
            options.unsubscribe(&self.invalidator);
        }

        let subscriptions: usize = self
            .cache
            .inner
            .registry
            .caches()
            .iter()
            .map(|caches| caches.raw.unsubscribe(&self.invalidator))
            .sum();

        debug!(
            consumer = %self.id,
            groups = owned.len(),
            borrowed = borrowed.len(),
            subscriptions,
            "consumer destroyed"
        );
    }

    fn window(
        &self,
        template: Option<&ResourceTemplate>,
        options: &ReadOptionsData,
    ) -> Result<(Arc<TemplateCaches>, Window), ResourceError> {
        let caches = self.cache.caches(template)?;
        let window = Window::new(options, template.and_then(ResourceTemplate::transform))?;
        Ok((caches, window))
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Consumer")
            .field("id", &self.id)
            .field("invalidator", &self.invalidator)
            .field("owned_groups", &state.owned_groups)
            .field("borrowed", &state.borrowed.len())
            .finish()
    }
}
