//! Templates: the data sources behind the cache
//!
//! A [`Template`] answers windowed reads by calling [`TemplateControls::put`]
//! zero or more times, synchronously or later from another thread. Templates
//! are built by a [`TemplateFactory`] from JSON construction options; the
//! cache builds each distinct (factory, options) pair once.
//!
//! Consumers name the template they read through with a [`ResourceTemplate`],
//! which optionally carries a field-name transform.

use crate::error::ReadError;
use crate::invalidator::Notifications;
use crate::keys::{ContentKey, SyntheticId};
use crate::metrics::CacheMetrics;
use crate::raw::{CacheStatus, RawCacheItem, RawItemCache};
use crate::request::RequestCache;
use crate::transform::TransformConfig;
use readthrough_types::{ReadRequest, ReadResponse};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// A data source answering windowed reads
pub trait Template: Send + Sync {
    /// Field holding an item's natural id
    fn id_key(&self) -> &str;

    /// Start a read
    ///
    /// The template answers through `controls`, now or later. An error
    /// returned here reaches the consumer that triggered the read.
    fn read(&self, request: ReadRequest, controls: TemplateControls) -> Result<(), ReadError>;
}

/// Builds templates from construction options
pub trait TemplateFactory: Send + Sync + 'static {
    /// Build a template for the given options
    ///
    /// Must be deterministic for equal options.
    fn create(&self, options: &Value) -> Arc<dyn Template>;

    /// Optional name for debugging
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl<F> TemplateFactory for F
where
    F: Fn(&Value) -> Arc<dyn Template> + Send + Sync + 'static,
{
    fn create(&self, options: &Value) -> Arc<dyn Template> {
        self(options)
    }
}

/// Factory handing out one already constructed template
struct FixedTemplate(Arc<dyn Template>);

impl TemplateFactory for FixedTemplate {
    fn create(&self, _options: &Value) -> Arc<dyn Template> {
        self.0.clone()
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// A template factory together with its construction options
#[derive(Clone)]
pub struct TemplateRef {
    factory: Arc<dyn TemplateFactory>,
    options: Value,
    options_key: ContentKey,
}

impl TemplateRef {
    pub fn new(factory: Arc<dyn TemplateFactory>, options: Value) -> Self {
        let options_key = ContentKey::for_options(&options);
        TemplateRef {
            factory,
            options,
            options_key,
        }
    }

    pub fn factory(&self) -> &Arc<dyn TemplateFactory> {
        &self.factory
    }

    pub fn options(&self) -> &Value {
        &self.options
    }

    pub fn options_key(&self) -> ContentKey {
        self.options_key
    }

    /// Identity of the factory allocation
    pub(crate) fn factory_id(&self) -> usize {
        Arc::as_ptr(&self.factory) as *const () as usize
    }
}

impl PartialEq for TemplateRef {
    fn eq(&self, other: &Self) -> bool {
        self.factory_id() == other.factory_id() && self.options_key == other.options_key
    }
}

impl fmt::Debug for TemplateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateRef")
            .field("factory", &self.factory.name())
            .field("options", &self.options)
            .finish()
    }
}

/// The template a consumer reads through
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceTemplate {
    /// Read rows as the template produces them
    Template(TemplateRef),

    /// Read through a field-name transform
    Transformed {
        template: TemplateRef,
        transform: TransformConfig,
    },
}

impl ResourceTemplate {
    /// A factory with construction options
    pub fn new(factory: Arc<dyn TemplateFactory>, options: Value) -> Self {
        ResourceTemplate::Template(TemplateRef::new(factory, options))
    }

    /// An already constructed template
    pub fn fixed(template: Arc<dyn Template>) -> Self {
        Self::new(Arc::new(FixedTemplate(template)), json!({}))
    }

    /// Bind a factory once and build resource templates from options
    ///
    /// Every template produced shares the factory, so equal options hit the
    /// same cache.
    pub fn from_factory(
        factory: Arc<dyn TemplateFactory>,
    ) -> impl Fn(Value) -> ResourceTemplate + Clone + Send + Sync {
        move |options| ResourceTemplate::new(factory.clone(), options)
    }

    /// Read this template through `transform`
    pub fn with_transform(self, transform: TransformConfig) -> Self {
        ResourceTemplate::Transformed {
            template: self.into_template_ref(),
            transform,
        }
    }

    pub fn template_ref(&self) -> &TemplateRef {
        match self {
            ResourceTemplate::Template(template) => template,
            ResourceTemplate::Transformed { template, .. } => template,
        }
    }

    pub fn transform(&self) -> Option<&TransformConfig> {
        match self {
            ResourceTemplate::Template(_) => None,
            ResourceTemplate::Transformed { transform, .. } => Some(transform),
        }
    }

    fn into_template_ref(self) -> TemplateRef {
        match self {
            ResourceTemplate::Template(template) => template,
            ResourceTemplate::Transformed { template, .. } => template,
        }
    }
}

/// Where the answer to one read is written
pub(crate) struct PutTarget {
    pub raw: Arc<RawItemCache>,
    pub requests: Arc<RequestCache>,
    pub metrics: Arc<CacheMetrics>,
    pub key: ContentKey,
    pub query_key: String,
    pub start: u64,
    pub window: Vec<SyntheticId>,
    /// Positions this read moved to pending
    pub claimed: Vec<SyntheticId>,
    pub id_key: String,
}

/// Handle a template uses to answer a read
///
/// Cheap to clone and safe to move to another thread or task.
#[derive(Clone)]
pub struct TemplateControls {
    target: Arc<PutTarget>,
}

impl TemplateControls {
    pub(crate) fn new(target: PutTarget) -> Self {
        TemplateControls {
            target: Arc::new(target),
        }
    }

    /// Deliver rows for the read
    ///
    /// Rows are assigned to the window's positions in order; positions past
    /// the end of the window get fresh ids, and window positions the response
    /// does not reach are orphaned. May be called more than once; each call
    /// supersedes the previous one for the positions it covers.
    pub fn put(&self, response: ReadResponse) {
        let target = &*self.target;
        let ReadResponse { data, total } = response;

        let ((resolved, orphaned), notifications) = target.raw.write(|w| {
            let mut ids = target.window.iter();
            let mut resolved = 0;
            for (idx, value) in data.into_iter().enumerate() {
                let id = match ids.next() {
                    Some(id) => id.clone(),
                    None => SyntheticId::new(&target.query_key, target.start + idx as u64),
                };
                w.set(&id, RawCacheItem::resolved(value), &target.id_key);
                resolved += 1;
            }

            let mut orphaned = 0;
            for id in ids {
                w.orphan(id);
                orphaned += 1;
            }
            (resolved, orphaned)
        });

        target.requests.complete(target.key, total);
        target.metrics.record_put(resolved, orphaned);
        debug!(request = %target.key, resolved, orphaned, ?total, "put");

        self.fire(notifications);
    }

    /// Fail the read
    ///
    /// The reason is reported to the next consumer that reads the same
    /// window. Positions this read claimed and never answered are released
    /// so that a later read starts over; positions another read is still
    /// answering are left alone.
    pub fn reject(&self, reason: impl Into<String>) {
        let target = &*self.target;
        let message = reason.into();

        let ((), notifications) = target.raw.write(|w| {
            for id in &target.claimed {
                let pending = w
                    .get(id)
                    .map(|item| item.status == CacheStatus::Pending)
                    .unwrap_or(false);
                if pending {
                    w.notify(id);
                    w.forget(id);
                }
            }
        });

        warn!(request = %target.key, reason = %message, "read rejected");
        target.requests.fail(target.key, message);
        target.metrics.record_failure();

        self.fire(notifications);
    }

    fn fire(&self, notifications: Notifications) {
        let fired = notifications.fire();
        self.target.metrics.record_invalidations(fired);
    }
}

impl fmt::Debug for TemplateControls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateControls")
            .field("request", &self.target.key)
            .field("window", &self.target.window.len())
            .finish()
    }
}
