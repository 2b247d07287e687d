//! Loader statistics

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of loader activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderStats {
    /// Batches dispatched by the coalescer
    pub batches: u64,

    /// Calls made to the user batch function
    pub upstream_calls: u64,

    /// Keys passed to the user batch function
    pub upstream_keys: u64,

    /// Batch positions answered from the cache
    pub cache_hits: u64,

    /// Batch positions that missed the cache
    pub cache_misses: u64,

    /// Loads answered from a primed fault without a batch
    pub primed_hits: u64,

    /// Write-backs that failed
    pub write_failures: u64,
}

impl LoaderStats {
    /// Cache hit rate over batch positions, as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            (self.cache_hits as f64 / total as f64) * 100.0
        }
    }
}

impl fmt::Display for LoaderStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LoaderStats {{ batches: {}, upstream_calls: {}, upstream_keys: {}, \
             hit_rate: {:.2}%, write_failures: {} }}",
            self.batches,
            self.upstream_calls,
            self.upstream_keys,
            self.hit_rate(),
            self.write_failures
        )
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub(crate) batches: AtomicU64,
    pub(crate) upstream_calls: AtomicU64,
    pub(crate) upstream_keys: AtomicU64,
    pub(crate) cache_hits: AtomicU64,
    pub(crate) cache_misses: AtomicU64,
    pub(crate) primed_hits: AtomicU64,
    pub(crate) write_failures: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> LoaderStats {
        LoaderStats {
            batches: self.batches.load(Ordering::Relaxed),
            upstream_calls: self.upstream_calls.load(Ordering::Relaxed),
            upstream_keys: self.upstream_keys.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            primed_hits: self.primed_hits.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}
