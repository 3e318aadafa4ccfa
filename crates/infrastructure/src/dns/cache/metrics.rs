use boreal_dns_application::CacheMetricsSnapshot;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic cache counters. Relaxed ordering throughout; these are
/// observability data, not synchronization.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub insertions: AtomicU64,
    pub special_writes_suppressed: AtomicU64,
    pub swept_records: AtomicU64,
}

impl CacheMetrics {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, total_entries: usize) -> CacheMetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheMetricsSnapshot {
            total_entries,
            hits,
            misses,
            insertions: self.insertions.load(Ordering::Relaxed),
            special_writes_suppressed: self.special_writes_suppressed.load(Ordering::Relaxed),
            swept_records: self.swept_records.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}
