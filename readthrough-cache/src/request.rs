//! In-flight request tracking
//!
//! One request cache exists per template instance. It records whether a read
//! for a given request key is in flight, the last total reported for it, and
//! the last asynchronous failure that has not been surfaced yet.

use crate::keys::ContentKey;
use dashmap::DashMap;

/// State of one request key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestCacheEntry {
    /// A read has been issued and has not answered yet
    pub inflight: bool,

    /// Total reported by the most recent answer
    pub total: Option<u64>,

    /// Rejection reason waiting to be reported to a consumer
    pub error: Option<String>,
}

/// Request table for a template instance
#[derive(Debug, Default)]
pub struct RequestCache {
    entries: DashMap<ContentKey, RequestCacheEntry>,
}

impl RequestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the entry for a key, or the empty entry if none was recorded
    pub fn get(&self, key: &ContentKey) -> RequestCacheEntry {
        self.entries
            .get(key)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    pub fn is_inflight(&self, key: &ContentKey) -> bool {
        self.entries
            .get(key)
            .map(|entry| entry.inflight)
            .unwrap_or(false)
    }

    /// Mark a read as issued unless one already is
    ///
    /// Keeps the last known total. Returns false when the key was already in
    /// flight.
    pub fn try_begin(&self, key: ContentKey) -> bool {
        let mut entry = self.entries.entry(key).or_default();
        if entry.inflight {
            return false;
        }
        entry.inflight = true;
        entry.error = None;
        true
    }

    /// Record an answer
    pub fn complete(&self, key: ContentKey, total: Option<u64>) {
        self.entries.insert(
            key,
            RequestCacheEntry {
                inflight: false,
                total,
                error: None,
            },
        );
    }

    /// Record a rejection to be surfaced on the next read
    pub fn fail(&self, key: ContentKey, error: String) {
        let mut entry = self.entries.entry(key).or_default();
        entry.inflight = false;
        entry.error = Some(error);
    }

    /// Clear the in-flight mark without recording an answer
    pub fn abort(&self, key: &ContentKey) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.inflight = false;
        }
    }

    /// Take a pending rejection, clearing it
    pub fn take_error(&self, key: &ContentKey) -> Option<String> {
        self.entries
            .get_mut(key)
            .and_then(|mut entry| entry.error.take())
    }

    /// Number of request keys seen
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of reads currently in flight
    pub fn inflight_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.inflight).count()
    }
}
