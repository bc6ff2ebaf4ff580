//! Shared read options
//!
//! A [`ReadOptions`] handle holds the current page, size and query of a
//! consumer group. Updates go through a merge function and, when the merged
//! result differs from the current options, every subscriber is invalidated.
//!
//! Groups live in an [`OptionsCache`], which also maps each handle back to
//! its group so a handle passed to another consumer can still register that
//! consumer as a subscriber.

use crate::invalidator::Invalidator;
use parking_lot::Mutex;
use readthrough_types::{PartialReadOptions, ReadOptionsData};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

static NEXT_SETTER_ID: AtomicU64 = AtomicU64::new(1);

/// Combines the current options with an update
pub type MergeFn =
    Arc<dyn Fn(&PartialReadOptions, &PartialReadOptions) -> PartialReadOptions + Send + Sync>;

/// Merge where every field set in the update replaces the current one
pub fn shallow_merge() -> MergeFn {
    Arc::new(|current, next| current.overlay(next))
}

/// Structural comparison that stops descending after `depth` levels
///
/// Values nested deeper than `depth` are treated as equal.
pub fn changed(a: &Value, b: &Value, depth: usize) -> bool {
    if depth == 0 {
        return false;
    }
    match (a, b) {
        (Value::Object(left), Value::Object(right)) => {
            if left.len() != right.len() || left.keys().any(|key| !right.contains_key(key)) {
                return true;
            }
            left.iter()
                .any(|(key, value)| changed(value, &right[key], depth - 1))
        }
        (Value::Array(left), Value::Array(right)) => {
            left.len() != right.len()
                || left
                    .iter()
                    .zip(right)
                    .any(|(l, r)| changed(l, r, depth - 1))
        }
        _ => a != b,
    }
}

struct OptionsRecord {
    options: PartialReadOptions,
    subscribers: HashSet<Invalidator>,
}

struct OptionsInner {
    id: u64,
    group: String,
    owner: Invalidator,
    merge: MergeFn,
    record: Mutex<OptionsRecord>,
    diff_depth: usize,
    default_page: u64,
    default_size: u64,
}

/// Setter handle for a group's options
#[derive(Clone)]
pub struct ReadOptions {
    inner: Arc<OptionsInner>,
}

impl ReadOptions {
    fn new(group: String, owner: Invalidator, merge: MergeFn, defaults: &OptionsDefaults) -> Self {
        let mut subscribers = HashSet::new();
        subscribers.insert(owner.clone());
        ReadOptions {
            inner: Arc::new(OptionsInner {
                id: NEXT_SETTER_ID.fetch_add(1, Ordering::Relaxed),
                group,
                owner,
                merge,
                record: Mutex::new(OptionsRecord {
                    options: PartialReadOptions::default(),
                    subscribers,
                }),
                diff_depth: defaults.diff_depth,
                default_page: defaults.page,
                default_size: defaults.size,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn group(&self) -> &str {
        &self.inner.group
    }

    /// Current options, registering the owning consumer for changes
    pub fn current(&self) -> ReadOptionsData {
        self.current_for(&self.inner.owner)
    }

    /// Current options, registering `invalidator` for changes
    pub fn current_for(&self, invalidator: &Invalidator) -> ReadOptionsData {
        let mut record = self.inner.record.lock();
        record.subscribers.insert(invalidator.clone());
        self.resolve(&record.options)
    }

    /// Current options without registering anyone
    pub fn peek(&self) -> ReadOptionsData {
        let record = self.inner.record.lock();
        self.resolve(&record.options)
    }

    /// Merge `update` into the current options
    ///
    /// When the merged options differ, they are committed and every
    /// subscriber is invalidated after the lock is released.
    pub fn set(&self, update: PartialReadOptions) -> ReadOptionsData {
        let (resolved, subscribers) = {
            let mut record = self.inner.record.lock();
            let merged = (self.inner.merge)(&record.options, &update);
            let is_changed = changed(
                &record.options.to_value(),
                &merged.to_value(),
                self.inner.diff_depth,
            );
            if !is_changed {
                return self.resolve(&record.options);
            }

            record.options = merged;
            let subscribers: Vec<Invalidator> = record.subscribers.iter().cloned().collect();
            (self.resolve(&record.options), subscribers)
        };

        debug!(
            group = %self.inner.group,
            page = resolved.page,
            size = resolved.size,
            subscribers = subscribers.len(),
            "options changed"
        );
        for subscriber in &subscribers {
            subscriber.invalidate();
        }
        resolved
    }

    pub fn subscribe(&self, invalidator: &Invalidator) {
        self.inner.record.lock().subscribers.insert(invalidator.clone());
    }

    pub fn unsubscribe(&self, invalidator: &Invalidator) -> bool {
        self.inner.record.lock().subscribers.remove(invalidator)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.record.lock().subscribers.len()
    }

    fn resolve(&self, options: &PartialReadOptions) -> ReadOptionsData {
        options.resolve(self.inner.default_page, self.inner.default_size)
    }
}

impl PartialEq for ReadOptions {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ReadOptions {}

impl fmt::Debug for ReadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOptions")
            .field("id", &self.inner.id)
            .field("group", &self.inner.group)
            .field("options", &self.inner.record.lock().options)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct OptionsDefaults {
    pub page: u64,
    pub size: u64,
    pub diff_depth: usize,
}

#[derive(Default)]
struct OptionsState {
    groups: HashMap<String, ReadOptions>,
    // setter id -> group id
    owners: HashMap<u64, String>,
}

/// All option groups of a cache
pub struct OptionsCache {
    state: Mutex<OptionsState>,
    defaults: OptionsDefaults,
}

impl OptionsCache {
    pub(crate) fn new(defaults: OptionsDefaults) -> Self {
        OptionsCache {
            state: Mutex::new(OptionsState::default()),
            defaults,
        }
    }

    /// Get the group's setter, creating it with `owner` as first subscriber
    ///
    /// Returns the setter and whether it was created by this call.
    pub fn create(&self, group: &str, owner: &Invalidator, merge: MergeFn) -> (ReadOptions, bool) {
        let mut state = self.state.lock();
        if let Some(existing) = state.groups.get(group) {
            return (existing.clone(), false);
        }

        let options = ReadOptions::new(group.to_string(), owner.clone(), merge, &self.defaults);
        state.groups.insert(group.to_string(), options.clone());
        state.owners.insert(options.id(), group.to_string());
        debug!(group, "created options group");
        (options, true)
    }

    /// Group a setter belongs to, if it is still registered
    pub fn owner_of(&self, options: &ReadOptions) -> Option<String> {
        self.state.lock().owners.get(&options.id()).cloned()
    }

    pub fn get(&self, group: &str) -> Option<ReadOptions> {
        self.state.lock().groups.get(group).cloned()
    }

    /// Remove a group and its reverse mapping
    pub fn remove(&self, group: &str) -> Option<ReadOptions> {
        let mut state = self.state.lock();
        let removed = state.groups.remove(group)?;
        state.owners.remove(&removed.id());
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.state.lock().groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.groups.clear();
        state.owners.clear();
    }
}

impl fmt::Debug for OptionsCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        let mut groups: Vec<&String> = state.groups.keys().collect();
        groups.sort();
        f.debug_struct("OptionsCache")
            .field("groups", &groups)
            .field("defaults", &self.defaults)
            .finish()
    }
}
