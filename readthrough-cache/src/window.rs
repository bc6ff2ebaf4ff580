//! Window resolution
//!
//! A window is the run of positions `[(page-1)*size, page*size)` of one query.
//! [`read_through`] scans the window against the raw item cache, subscribes
//! the caller to every position it is still waiting on and issues at most one
//! read for the window's request. [`peek`] scans without side effects.

use crate::error::ResourceError;
use crate::invalidator::Invalidator;
use crate::keys::{canonical_query, ContentKey, SyntheticId};
use crate::metrics::CacheMetrics;
use crate::raw::{CacheStatus, RawCacheItem};
use crate::registry::TemplateCaches;
use crate::template::{PutTarget, TemplateControls};
use crate::transform::TransformConfig;
use readthrough_types::{
    ReadOptionsData, ReadRequest, ReadStatus, ResourceItem, ResourceMeta, ResourceWithMeta,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Request, key and position ids of one window
#[derive(Debug, Clone)]
pub(crate) struct Window {
    pub request: ReadRequest,
    pub key: ContentKey,
    pub query_key: String,
    pub start: u64,
    pub ids: Vec<SyntheticId>,
}

impl Window {
    /// Compute the window for `options`, rewriting the query to native names
    pub fn new(
        options: &ReadOptionsData,
        transform: Option<&TransformConfig>,
    ) -> Result<Self, ResourceError> {
        let invalid = || ResourceError::InvalidWindow {
            page: options.page,
            size: options.size,
        };
        // pages start at 1, and the last position must fit in a u64
        let start = options
            .page
            .checked_sub(1)
            .and_then(|index| index.checked_mul(options.size))
            .ok_or_else(invalid)?;
        let end = start.checked_add(options.size).ok_or_else(invalid)?;

        let query = match transform {
            Some(transform) => transform.query(&options.query),
            None => options.query.clone(),
        };
        let query_key = canonical_query(&query);
        let ids = (start..end)
            .map(|position| SyntheticId::new(&query_key, position))
            .collect();

        let request = ReadRequest {
            offset: start,
            size: options.size,
            query,
        };
        let key = ContentKey::for_request(&request);

        Ok(Window {
            request,
            key,
            query_key,
            start,
            ids,
        })
    }
}

/// What a scan found at one position
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Slot {
    Value(Value),
    Pending,
    Orphaned,
    Unread,
}

impl Slot {
    fn from_item(item: Option<RawCacheItem>) -> Self {
        match item {
            None => Slot::Unread,
            Some(item) => match item.status {
                CacheStatus::Resolved => Slot::Value(item.value.unwrap_or(Value::Null)),
                CacheStatus::Pending => Slot::Pending,
                CacheStatus::Orphaned => Slot::Orphaned,
            },
        }
    }

    fn is_incomplete(&self) -> bool {
        matches!(self, Slot::Pending | Slot::Unread)
    }
}

/// Outcome of scanning a window
#[derive(Debug, Clone)]
pub(crate) struct Scan {
    pub slots: Vec<Slot>,
    pub total: Option<u64>,
    pub error: Option<String>,
}

impl Scan {
    /// Values of a fully available window, orphans left out
    pub fn into_values(self, transform: Option<&TransformConfig>) -> Option<Vec<Value>> {
        if self.slots.iter().any(Slot::is_incomplete) {
            return None;
        }
        let values = self
            .slots
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Value(value) => Some(apply(transform, value)),
                _ => None,
            })
            .collect();
        Some(values)
    }

    /// One optional value per position
    pub fn into_optional_values(self, transform: Option<&TransformConfig>) -> Vec<Option<Value>> {
        self.slots
            .into_iter()
            .map(|slot| match slot {
                Slot::Value(value) => Some(apply(transform, value)),
                _ => None,
            })
            .collect()
    }

    /// Per-position status, one entry per position
    pub fn into_meta(self, transform: Option<&TransformConfig>) -> ResourceWithMeta {
        let mut status = ReadStatus::Read;
        let data = self
            .slots
            .into_iter()
            .map(|slot| {
                let item = match slot {
                    Slot::Value(value) => ResourceItem {
                        value: Some(apply(transform, value)),
                        status: ReadStatus::Read,
                    },
                    Slot::Orphaned => ResourceItem {
                        value: None,
                        status: ReadStatus::Read,
                    },
                    Slot::Pending => ResourceItem {
                        value: None,
                        status: ReadStatus::Reading,
                    },
                    Slot::Unread => ResourceItem {
                        value: None,
                        status: ReadStatus::Unread,
                    },
                };
                status = match (status, item.status) {
                    (ReadStatus::Unread, _) | (_, ReadStatus::Unread) => ReadStatus::Unread,
                    (ReadStatus::Reading, _) | (_, ReadStatus::Reading) => ReadStatus::Reading,
                    _ => ReadStatus::Read,
                };
                item
            })
            .collect();

        ResourceWithMeta {
            data,
            meta: ResourceMeta {
                status,
                total: self.total,
                error: self.error,
            },
        }
    }
}

fn apply(transform: Option<&TransformConfig>, value: Value) -> Value {
    match transform {
        Some(transform) => transform.data(&value),
        None => value,
    }
}

/// Resolve a window, reading from the template when positions are missing
///
/// Returns `Ok(None)` when a plain read finds the window's request already in
/// flight. A rejection recorded for the request is reported once: as an error
/// in plain mode, in `meta.error` in meta mode.
pub(crate) fn read_through(
    caches: &TemplateCaches,
    window: &Window,
    invalidator: &Invalidator,
    metrics: &Arc<CacheMetrics>,
    meta: bool,
) -> Result<Option<Scan>, ResourceError> {
    let requests = &caches.requests;

    if let Some(message) = requests.take_error(&window.key) {
        if !meta {
            return Err(ResourceError::ReadFailed { message });
        }
        let mut scan = peek(caches, window);
        scan.error = Some(message);
        return Ok(Some(scan));
    }

    if !meta && requests.is_inflight(&window.key) {
        metrics.record_deduplicated();
        trace!(request = %window.key, "read in flight");
        return Ok(None);
    }

    let ((mut slots, claimed, subscription), _) = caches.raw.write(|w| {
        let mut slots = Vec::with_capacity(window.ids.len());
        let mut incomplete = Vec::new();
        let mut orphaned = Vec::new();
        // positions this call moved to pending; nobody else is reading them
        let mut claimed = Vec::new();

        for (idx, id) in window.ids.iter().enumerate() {
            let slot = Slot::from_item(w.get(id));
            match slot {
                Slot::Value(_) => metrics.record_hit(),
                Slot::Pending => {
                    metrics.record_miss();
                    incomplete.push(id.clone());
                }
                Slot::Orphaned => {
                    metrics.record_miss();
                    orphaned.push(idx);
                }
                Slot::Unread => {
                    metrics.record_miss();
                    w.add_synthetic_id(id);
                    incomplete.push(id.clone());
                    claimed.push(id.clone());
                }
            }
            slots.push(match slot {
                Slot::Unread => Slot::Pending,
                slot => slot,
            });
        }

        // a page is never served half from orphaned rows and half from fresh ones
        if !orphaned.is_empty() && !incomplete.is_empty() {
            for idx in orphaned {
                let id = &window.ids[idx];
                w.add_synthetic_id(id);
                incomplete.push(id.clone());
                claimed.push(id.clone());
                slots[idx] = Slot::Pending;
            }
            debug!(request = %window.key, "resetting orphaned positions");
        }

        let subscription =
            (!incomplete.is_empty()).then(|| w.subscribe(&incomplete, invalidator.clone()));
        (slots, claimed, subscription)
    });

    if !claimed.is_empty() {
        if requests.try_begin(window.key) {
            issue_read(caches, window, metrics, claimed, subscription)?;

            if !requests.is_inflight(&window.key) {
                slots = caches
                    .raw
                    .get_many(&window.ids)
                    .into_iter()
                    .map(Slot::from_item)
                    .collect();

                if let Some(message) = requests.take_error(&window.key) {
                    if !meta {
                        return Err(ResourceError::ReadFailed { message });
                    }
                    return Ok(Some(Scan {
                        slots,
                        total: requests.get(&window.key).total,
                        error: Some(message),
                    }));
                }
            }
        } else {
            metrics.record_deduplicated();
        }
    }

    Ok(Some(Scan {
        slots,
        total: requests.get(&window.key).total,
        error: None,
    }))
}

/// Hand the window to the template
///
/// On a synchronous error only the `claimed` placeholders are dropped;
/// pending positions owned by another read keep waiting for it.
fn issue_read(
    caches: &TemplateCaches,
    window: &Window,
    metrics: &Arc<CacheMetrics>,
    claimed: Vec<SyntheticId>,
    subscription: Option<u64>,
) -> Result<(), ResourceError> {
    let controls = TemplateControls::new(PutTarget {
        raw: caches.raw.clone(),
        requests: caches.requests.clone(),
        metrics: metrics.clone(),
        key: window.key,
        query_key: window.query_key.clone(),
        start: window.start,
        window: window.ids.clone(),
        claimed: claimed.clone(),
        id_key: caches.instance.id_key().to_string(),
    });

    metrics.record_read();
    debug!(
        request = %window.key,
        offset = window.request.offset,
        size = window.request.size,
        "reading window"
    );

    if let Err(err) = caches.instance.read(window.request.clone(), controls) {
        warn!(request = %window.key, error = %err, "template read failed");
        metrics.record_failure();
        caches.requests.abort(&window.key);
        let ((), _) = caches.raw.write(|w| {
            if let Some(subscription) = subscription {
                w.cancel(subscription);
            }
            for id in &claimed {
                w.forget(id);
            }
        });
        return Err(err.into());
    }
    Ok(())
}

/// Scan a window without reading or creating placeholders
pub(crate) fn peek(caches: &TemplateCaches, window: &Window) -> Scan {
    let entry = caches.requests.get(&window.key);
    let slots = caches
        .raw
        .get_many(&window.ids)
        .into_iter()
        .map(Slot::from_item)
        .collect();

    Scan {
        slots,
        total: entry.total,
        error: entry.error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use readthrough_types::ReadQuery;
    use serde_json::json;

    #[test]
    fn test_window_positions() {
        let window = Window::new(&ReadOptionsData::new(2, 3), None).unwrap();
        assert_eq!(window.start, 3);
        assert_eq!(window.request.offset, 3);
        assert_eq!(window.request.size, 3);

        let positions: Vec<_> = window.ids.iter().filter_map(|id| id.position()).collect();
        assert_eq!(positions, vec![3, 4, 5]);
        assert_eq!(window.ids[0].as_str(), "{}/3");
    }

    #[test]
    fn test_page_zero_is_rejected() {
        let err = Window::new(&ReadOptionsData::new(0, 3), None).unwrap_err();
        assert!(matches!(err, ResourceError::InvalidWindow { page: 0, size: 3 }));
    }

    #[test]
    fn test_overflowing_window_is_rejected() {
        let err = Window::new(&ReadOptionsData::new(u64::MAX / 2, 4), None).unwrap_err();
        assert!(matches!(err, ResourceError::InvalidWindow { size: 4, .. }));

        // start fits, but the window runs past the last position
        let err = Window::new(&ReadOptionsData::new(2, u64::MAX / 2 + 1), None).unwrap_err();
        assert!(matches!(err, ResourceError::InvalidWindow { page: 2, .. }));

        let last = Window::new(&ReadOptionsData::new(u64::MAX, 1), None).unwrap();
        assert_eq!(last.start, u64::MAX - 1);
    }

    #[test]
    fn test_window_uses_native_query() {
        let mut query = ReadQuery::new();
        query.insert("name".to_string(), json!("x"));
        let options = ReadOptionsData::new(1, 1).with_query(query);
        let transform = TransformConfig::new().map("name", "title");

        let window = Window::new(&options, Some(&transform)).unwrap();
        assert_eq!(window.ids[0].as_str(), r#"{"title":"x"}/0"#);
        assert!(window.request.query.contains_key("title"));
    }

    #[test]
    fn test_values_drop_orphans() {
        let scan = Scan {
            slots: vec![Slot::Value(json!(1)), Slot::Orphaned],
            total: None,
            error: None,
        };
        assert_eq!(scan.into_values(None), Some(vec![json!(1)]));
    }

    #[test]
    fn test_values_wait_for_pending() {
        let scan = Scan {
            slots: vec![Slot::Value(json!(1)), Slot::Pending],
            total: None,
            error: None,
        };
        assert_eq!(scan.into_values(None), None);
    }

    #[test]
    fn test_meta_status() {
        let scan = Scan {
            slots: vec![Slot::Value(json!(1)), Slot::Pending, Slot::Orphaned],
            total: Some(4),
            error: None,
        };
        let meta = scan.into_meta(None);
        assert_eq!(meta.data.len(), 3);
        assert_eq!(meta.meta.status, ReadStatus::Reading);
        assert_eq!(meta.meta.total, Some(4));
        assert_eq!(meta.data[2].status, ReadStatus::Read);

        let unread = Scan {
            slots: vec![Slot::Pending, Slot::Unread],
            total: None,
            error: None,
        };
        assert_eq!(unread.into_meta(None).meta.status, ReadStatus::Unread);
    }
}
