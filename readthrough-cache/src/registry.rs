//! Template cache registry
//!
//! One [`TemplateCaches`] triple (template instance, raw item cache, request
//! cache) exists per distinct pair of factory and canonical construction
//! options. Factories are told apart by the identity of their allocation.

use crate::error::ResourceError;
use crate::keys::ContentKey;
use crate::raw::RawItemCache;
use crate::request::RequestCache;
use crate::template::{ResourceTemplate, Template, TemplateFactory};
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// The caches backing one template instance
pub struct TemplateCaches {
    pub instance: Arc<dyn Template>,
    pub raw: Arc<RawItemCache>,
    pub requests: Arc<RequestCache>,
}

impl TemplateCaches {
    fn new(instance: Arc<dyn Template>) -> Self {
        TemplateCaches {
            instance,
            raw: Arc::new(RawItemCache::new()),
            requests: Arc::new(RequestCache::new()),
        }
    }
}

impl fmt::Debug for TemplateCaches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateCaches")
            .field("id_key", &self.instance.id_key())
            .field("positions", &self.raw.len())
            .field("requests", &self.requests.len())
            .finish()
    }
}

struct FactoryEntry {
    // keeps the allocation alive so its address is not reused
    factory: Arc<dyn TemplateFactory>,
    instances: HashMap<ContentKey, Arc<TemplateCaches>>,
}

/// Registry of template instances and their caches
#[derive(Default)]
pub struct TemplateRegistry {
    factories: DashMap<usize, FactoryEntry>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the caches for a template, constructing it on first use
    ///
    /// The factory runs without any registry lock held. When two threads race
    /// to construct the same instance, the first one stored wins and the
    /// other is dropped.
    pub fn get_or_create(
        &self,
        template: Option<&ResourceTemplate>,
    ) -> Result<Arc<TemplateCaches>, ResourceError> {
        let template = template.ok_or(ResourceError::InvalidTemplate)?;
        let template_ref = template.template_ref();
        let factory_id = template_ref.factory_id();
        let options_key = template_ref.options_key();

        if let Some(caches) = self
            .factories
            .get(&factory_id)
            .and_then(|entry| entry.instances.get(&options_key).cloned())
        {
            return Ok(caches);
        }

        let instance = template_ref.factory().create(template_ref.options());
        debug!(
            factory = template_ref.factory().name(),
            options = %options_key,
            id_key = instance.id_key(),
            "constructed template"
        );

        let mut entry = self
            .factories
            .entry(factory_id)
            .or_insert_with(|| FactoryEntry {
                factory: template_ref.factory().clone(),
                instances: HashMap::new(),
            });
        let caches = entry
            .instances
            .entry(options_key)
            .or_insert_with(|| Arc::new(TemplateCaches::new(instance)))
            .clone();
        Ok(caches)
    }

    /// Number of constructed template instances
    pub fn len(&self) -> usize {
        self.factories
            .iter()
            .map(|entry| entry.instances.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every constructed instance's caches
    pub fn caches(&self) -> Vec<Arc<TemplateCaches>> {
        self.factories
            .iter()
            .flat_map(|entry| entry.instances.values().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Drop every instance and its cached data
    pub fn clear(&self) {
        self.factories.clear();
    }
}

impl fmt::Debug for TemplateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let factories: Vec<&'static str> = self
            .factories
            .iter()
            .map(|entry| entry.factory.name())
            .collect();
        f.debug_struct("TemplateRegistry")
            .field("factories", &factories)
            .field("instances", &self.len())
            .finish()
    }
}
