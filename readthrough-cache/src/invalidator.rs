//! Invalidation callbacks
//!
//! An [`Invalidator`] is the zero-argument callback a consumer hands to the
//! cache. Calling it tells the consumer to run again; it carries a
//! process-unique id so it can live in sets and be unsubscribed later.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_INVALIDATOR_ID: AtomicU64 = AtomicU64::new(1);

/// Callback that schedules a consumer to re-run
#[derive(Clone)]
pub struct Invalidator {
    id: u64,
    callback: Arc<dyn Fn() + Send + Sync>,
}

impl Invalidator {
    pub fn new(callback: impl Fn() + Send + Sync + 'static) -> Self {
        Invalidator {
            id: NEXT_INVALIDATOR_ID.fetch_add(1, Ordering::Relaxed),
            callback: Arc::new(callback),
        }
    }

    /// A callback that does nothing
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn invalidate(&self) {
        (self.callback)()
    }
}

impl PartialEq for Invalidator {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Invalidator {}

impl Hash for Invalidator {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Invalidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Invalidator").field(&self.id).finish()
    }
}

/// Invalidators collected while a lock was held, fired once it is released
#[derive(Debug, Default)]
#[must_use = "collected invalidators do nothing until fired"]
pub struct Notifications {
    pending: Vec<Invalidator>,
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, invalidator: Invalidator) {
        self.pending.push(invalidator);
    }

    /// Call every collected invalidator, each distinct one once
    ///
    /// Returns the number of callbacks made.
    pub fn fire(self) -> usize {
        let mut seen = HashSet::new();
        let mut fired = 0;
        for invalidator in self.pending {
            if seen.insert(invalidator.id()) {
                invalidator.invalidate();
                fired += 1;
            }
        }
        fired
    }
}
