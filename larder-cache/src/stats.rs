//! Orchestrator statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of orchestrator activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Calls served from storage without producing.
    pub hits: u64,
    /// Calls that found no entry.
    pub misses: u64,
    /// Calls that found an expired entry.
    pub expirations: u64,
    /// Successful producer runs written back to storage.
    pub regenerations: u64,
    /// Producer failures answered with the existing entry.
    pub stale_fallbacks: u64,
    /// Producer failures, whether or not a fallback was served.
    pub producer_failures: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.expirations;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Lock-free counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    regenerations: AtomicU64,
    stale_fallbacks: AtomicU64,
    producer_failures: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_regeneration(&self) {
        self.regenerations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_producer_failure(&self, fell_back: bool) {
        self.producer_failures.fetch_add(1, Ordering::Relaxed);
        if fell_back {
            self.stale_fallbacks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            regenerations: self.regenerations.load(Ordering::Relaxed),
            stale_fallbacks: self.stale_fallbacks.load(Ordering::Relaxed),
            producer_failures: self.producer_failures.load(Ordering::Relaxed),
        }
    }
}
