//! Store statistics

use serde::{Deserialize, Serialize};
use std::fmt;

/// Counters kept by [`MemoryStore`](crate::store::MemoryStore)
///
/// Counters cover the whole backing map, so namespaced views of one store
/// report the same numbers.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads that found a live record
    pub hits: u64,

    /// Reads that found nothing or an expired record
    pub misses: u64,

    /// Records written, updates included
    pub writes: u64,

    /// Records currently held, expired ones included until they are noticed
    pub entries: usize,

    /// Records dropped because their TTL ran out
    pub expired: u64,

    /// Records dropped to stay under `max_entries`
    pub evicted: u64,

    /// Records removed by `delete`, `delete_many` or `clear`
    pub invalidated: u64,
}

/// Something the store counts
#[derive(Debug, Clone, Copy)]
pub(crate) enum StoreEvent {
    Hit,
    Miss,
    Write,
    Expired(u64),
    Evicted,
    Invalidated(u64),
}

impl CacheStats {
    /// Number of reads, hit or miss
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// Share of reads that hit, as a percentage
    pub fn hit_rate(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            lookups => (self.hits as f64 / lookups as f64) * 100.0,
        }
    }

    /// Records that left the store for any reason
    pub fn removed(&self) -> u64 {
        self.expired + self.evicted + self.invalidated
    }

    pub(crate) fn record(&mut self, event: StoreEvent) {
        match event {
            StoreEvent::Hit => self.hits += 1,
            StoreEvent::Miss => self.misses += 1,
            StoreEvent::Write => self.writes += 1,
            StoreEvent::Expired(n) => self.expired += n,
            StoreEvent::Evicted => self.evicted += 1,
            StoreEvent::Invalidated(n) => self.invalidated += n,
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entries, {}/{} hits ({:.1}%), {} writes, {} removed",
            self.entries,
            self.hits,
            self.lookups(),
            self.hit_rate(),
            self.writes,
            self.removed()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let mut stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);

        for _ in 0..3 {
            stats.record(StoreEvent::Hit);
        }
        stats.record(StoreEvent::Miss);

        assert_eq!(stats.lookups(), 4);
        assert_eq!(stats.hit_rate(), 75.0);
    }

    #[test]
    fn test_removed_sums_every_cause() {
        let mut stats = CacheStats::default();
        stats.record(StoreEvent::Expired(2));
        stats.record(StoreEvent::Evicted);
        stats.record(StoreEvent::Invalidated(4));

        assert_eq!(stats.removed(), 7);
    }

    #[test]
    fn test_display() {
        let stats = CacheStats {
            hits: 1,
            misses: 1,
            writes: 2,
            entries: 2,
            ..Default::default()
        };

        assert_eq!(stats.to_string(), "2 entries, 1/2 hits (50.0%), 2 writes, 0 removed");
    }
}
