//! Cache metrics
//!
//! Counters for tracking how windows are served: positions found in the
//! cache, reads issued and deduplicated, and the invalidation fan-out.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every template instance of a cache
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Positions served from the cache
    pub hit_count: AtomicU64,

    /// Positions that were not resolved when scanned
    pub miss_count: AtomicU64,

    /// Template reads issued
    pub read_count: AtomicU64,

    /// Reads skipped because the same request was in flight
    pub deduplicated_count: AtomicU64,

    /// Reads that failed or were rejected
    pub failed_count: AtomicU64,

    /// Positions written by `put`
    pub resolved_count: AtomicU64,

    /// Positions orphaned by `put`
    pub orphaned_count: AtomicU64,

    /// Invalidators called
    pub invalidation_count: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hit_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.miss_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self) {
        self.read_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deduplicated(&self) {
        self.deduplicated_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one `put`
    pub fn record_put(&self, resolved: usize, orphaned: usize) {
        self.resolved_count
            .fetch_add(resolved as u64, Ordering::Relaxed);
        self.orphaned_count
            .fetch_add(orphaned as u64, Ordering::Relaxed);
    }

    pub fn record_invalidations(&self, count: usize) {
        self.invalidation_count
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Get position hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        self.snapshot().hit_rate()
    }

    /// Reset all counters
    pub fn reset(&self) {
        for counter in [
            &self.hit_count,
            &self.miss_count,
            &self.read_count,
            &self.deduplicated_count,
            &self.failed_count,
            &self.resolved_count,
            &self.orphaned_count,
            &self.invalidation_count,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hit_count.load(Ordering::Relaxed),
            misses: self.miss_count.load(Ordering::Relaxed),
            reads: self.read_count.load(Ordering::Relaxed),
            deduplicated: self.deduplicated_count.load(Ordering::Relaxed),
            failed: self.failed_count.load(Ordering::Relaxed),
            resolved: self.resolved_count.load(Ordering::Relaxed),
            orphaned: self.orphaned_count.load(Ordering::Relaxed),
            invalidations: self.invalidation_count.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of cache metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub reads: u64,
    pub deduplicated: u64,
    pub failed: u64,
    pub resolved: u64,
    pub orphaned: u64,
    pub invalidations: u64,
}

impl MetricsSnapshot {
    /// Get position hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Cache Statistics:")?;
        writeln!(
            f,
            "  Hits: {} | Misses: {} | Hit Rate: {:.1}%",
            self.hits,
            self.misses,
            self.hit_rate() * 100.0
        )?;
        writeln!(
            f,
            "  Reads: {} | Deduplicated: {} | Failed: {}",
            self.reads, self.deduplicated, self.failed
        )?;
        writeln!(
            f,
            "  Resolved: {} | Orphaned: {} | Invalidations: {}",
            self.resolved, self.orphaned, self.invalidations
        )?;
        Ok(())
    }
}
