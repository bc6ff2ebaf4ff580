//! Positional item storage and subscriber fan-out
//!
//! The raw item cache maps synthetic ids (positions within a query) to natural
//! item ids and to the stored values, tracks the status of every position it
//! has seen, and notifies the subscriptions that depend on a position when it
//! resolves or is orphaned.
//!
//! A subscription covers a set of positions and fires exactly once, after each
//! of them has been notified at least once. Only subscriptions touching the
//! notified position are visited.

use crate::invalidator::{Invalidator, Notifications};
use crate::keys::{canonical_json, SyntheticId};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{trace, warn};

/// Resolution status of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    /// Requested, no value yet
    Pending,
    /// Value present and backed by the latest response for the position
    Resolved,
    /// Used to be resolved, but the latest response no longer covers it
    Orphaned,
}

/// A cached value with its status
#[derive(Debug, Clone, PartialEq)]
pub struct RawCacheItem {
    pub status: CacheStatus,
    pub value: Option<Value>,
    pub mtime: Instant,
}

impl RawCacheItem {
    /// A resolved item holding `value`
    pub fn resolved(value: Value) -> Self {
        RawCacheItem {
            status: CacheStatus::Resolved,
            value: Some(value),
            mtime: Instant::now(),
        }
    }

    /// A status-only item with no value
    pub fn placeholder(status: CacheStatus) -> Self {
        RawCacheItem {
            status,
            value: None,
            mtime: Instant::now(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status == CacheStatus::Resolved
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum IdMapEntry {
    Resolved(String),
    Pending,
    Orphaned,
}

#[derive(Debug)]
struct Subscription {
    synthetic_ids: Vec<SyntheticId>,
    invalidator: Invalidator,
    remaining: HashSet<SyntheticId>,
}

#[derive(Debug, Default)]
struct RawState {
    next_subscriber: u64,
    /// natural id -> stored item
    items: HashMap<String, RawCacheItem>,
    synthetic_to_id: HashMap<SyntheticId, IdMapEntry>,
    id_to_synthetic: HashMap<String, SyntheticId>,
    synthetic_subscribers: HashMap<SyntheticId, HashSet<u64>>,
    subscribers: HashMap<u64, Subscription>,
}

/// Positional item cache for one template instance
#[derive(Debug, Default)]
pub struct RawItemCache {
    state: Mutex<RawState>,
}

impl RawItemCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run several mutations under one lock
    ///
    /// Subscriptions satisfied during the batch are returned instead of being
    /// fired, so the caller can fire them after the lock is released.
    pub fn write<R>(&self, f: impl FnOnce(&mut RawWriter<'_>) -> R) -> (R, Notifications) {
        let mut state = self.state.lock();
        let mut writer = RawWriter {
            state: &mut *state,
            notifications: Notifications::new(),
        };
        let result = f(&mut writer);
        let notifications = std::mem::take(&mut writer.notifications);
        (result, notifications)
    }

    /// Look up the item at a position
    ///
    /// Pending and orphaned positions yield a status-only item.
    pub fn get(&self, id: &SyntheticId) -> Option<RawCacheItem> {
        self.state.lock().get(id)
    }

    /// Look up several positions under one lock
    pub fn get_many(&self, ids: &[SyntheticId]) -> Vec<Option<RawCacheItem>> {
        let state = self.state.lock();
        ids.iter().map(|id| state.get(id)).collect()
    }

    /// Mark a position as pending
    pub fn add_synthetic_id(&self, id: &SyntheticId) {
        let ((), _) = self.write(|w| w.add_synthetic_id(id));
    }

    /// Store a value at a position and notify its subscribers
    pub fn set(&self, id: &SyntheticId, item: RawCacheItem, id_key: &str) {
        let ((), notifications) = self.write(|w| w.set(id, item, id_key));
        notifications.fire();
    }

    /// Notify the subscribers of a position, then mark it orphaned
    pub fn orphan(&self, id: &SyntheticId) {
        let ((), notifications) = self.write(|w| w.orphan(id));
        notifications.fire();
    }

    /// Register `invalidator` to fire once every id in `ids` has been notified
    pub fn subscribe(&self, ids: &[SyntheticId], invalidator: Invalidator) -> u64 {
        let (subscription, _) = self.write(|w| w.subscribe(ids, invalidator));
        subscription
    }

    /// Notify the subscribers of a position
    pub fn notify(&self, id: &SyntheticId) {
        let ((), notifications) = self.write(|w| w.notify(id));
        notifications.fire();
    }

    /// Drop every subscription registered with `invalidator`
    pub fn unsubscribe(&self, invalidator: &Invalidator) -> usize {
        self.state.lock().unsubscribe(invalidator)
    }

    /// Number of positions seen so far
    pub fn len(&self) -> usize {
        self.state.lock().synthetic_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live subscriptions
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }
}

impl RawState {
    fn get(&self, id: &SyntheticId) -> Option<RawCacheItem> {
        match self.synthetic_to_id.get(id)? {
            IdMapEntry::Resolved(natural) => self.items.get(natural).cloned(),
            IdMapEntry::Pending => Some(RawCacheItem::placeholder(CacheStatus::Pending)),
            IdMapEntry::Orphaned => Some(RawCacheItem::placeholder(CacheStatus::Orphaned)),
        }
    }

    /// Remove the reverse mapping of whatever natural id `id` resolved to
    fn release_natural(&mut self, id: &SyntheticId) {
        if let Some(IdMapEntry::Resolved(natural)) = self.synthetic_to_id.get(id) {
            if self.id_to_synthetic.get(natural) == Some(id) {
                self.id_to_synthetic.remove(natural);
            }
        }
    }

    fn unsubscribe(&mut self, invalidator: &Invalidator) -> usize {
        let owned: Vec<u64> = self
            .subscribers
            .iter()
            .filter(|(_, sub)| sub.invalidator == *invalidator)
            .map(|(id, _)| *id)
            .collect();

        for subscriber_id in &owned {
            if let Some(sub) = self.subscribers.remove(subscriber_id) {
                self.detach(*subscriber_id, &sub.synthetic_ids);
            }
        }
        owned.len()
    }

    fn detach(&mut self, subscriber_id: u64, ids: &[SyntheticId]) {
        for id in ids {
            if let Some(set) = self.synthetic_subscribers.get_mut(id) {
                set.remove(&subscriber_id);
                if set.is_empty() {
                    self.synthetic_subscribers.remove(id);
                }
            }
        }
    }
}

/// Mutation access to a [`RawItemCache`] while its lock is held
#[derive(Debug)]
pub struct RawWriter<'a> {
    state: &'a mut RawState,
    notifications: Notifications,
}

impl RawWriter<'_> {
    pub fn get(&self, id: &SyntheticId) -> Option<RawCacheItem> {
        self.state.get(id)
    }

    pub fn add_synthetic_id(&mut self, id: &SyntheticId) {
        self.state.release_natural(id);
        self.state
            .synthetic_to_id
            .insert(id.clone(), IdMapEntry::Pending);
    }

    pub fn set(&mut self, id: &SyntheticId, item: RawCacheItem, id_key: &str) {
        let natural = match item.value.as_ref().and_then(|value| value.get(id_key)) {
            Some(natural) => canonical_json(natural),
            None => {
                warn!(position = %id, id_key, "row has no id field, keying it by position");
                id.as_str().to_string()
            }
        };

        self.state.release_natural(id);
        self.state
            .synthetic_to_id
            .insert(id.clone(), IdMapEntry::Resolved(natural.clone()));
        self.state.id_to_synthetic.insert(natural.clone(), id.clone());
        self.state.items.insert(natural, item);
        self.notify(id);
    }

    pub fn orphan(&mut self, id: &SyntheticId) {
        self.notify(id);
        self.state.release_natural(id);
        self.state
            .synthetic_to_id
            .insert(id.clone(), IdMapEntry::Orphaned);
    }

    /// Drop a position that is still pending so it reads as unseen
    ///
    /// Returns false when the position is resolved or orphaned.
    pub fn forget(&mut self, id: &SyntheticId) -> bool {
        if self.state.synthetic_to_id.get(id) == Some(&IdMapEntry::Pending) {
            self.state.synthetic_to_id.remove(id);
            true
        } else {
            false
        }
    }

    /// Returns the subscription's id, for [`RawWriter::cancel`]
    pub fn subscribe(&mut self, ids: &[SyntheticId], invalidator: Invalidator) -> u64 {
        let subscriber_id = self.state.next_subscriber;
        self.state.next_subscriber += 1;

        for id in ids {
            self.state
                .synthetic_subscribers
                .entry(id.clone())
                .or_default()
                .insert(subscriber_id);
        }

        self.state.subscribers.insert(
            subscriber_id,
            Subscription {
                synthetic_ids: ids.to_vec(),
                invalidator,
                remaining: ids.iter().cloned().collect(),
            },
        );
        subscriber_id
    }

    /// Drop one subscription without firing it
    pub fn cancel(&mut self, subscription: u64) -> bool {
        match self.state.subscribers.remove(&subscription) {
            Some(sub) => {
                self.state.detach(subscription, &sub.synthetic_ids);
                true
            }
            None => false,
        }
    }

    pub fn notify(&mut self, id: &SyntheticId) {
        // every subscription touching `id` stops referencing it
        let Some(subscriber_ids) = self.state.synthetic_subscribers.remove(id) else {
            return;
        };

        for subscriber_id in subscriber_ids {
            let satisfied = match self.state.subscribers.get_mut(&subscriber_id) {
                Some(sub) => {
                    sub.remaining.remove(id);
                    sub.remaining.is_empty()
                }
                None => continue,
            };

            if satisfied {
                if let Some(sub) = self.state.subscribers.remove(&subscriber_id) {
                    self.state.detach(subscriber_id, &sub.synthetic_ids);
                    trace!(position = %id, subscriber = subscriber_id, "subscription satisfied");
                    self.notifications.push(sub.invalidator);
                }
            }
        }
    }
}
