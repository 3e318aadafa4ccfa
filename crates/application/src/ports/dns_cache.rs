/// Snapshot of cache counters for logging and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct CacheMetricsSnapshot {
    pub total_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub special_writes_suppressed: u64,
    pub swept_records: u64,
    pub hit_rate: f64,
}

/// Maintenance surface of the response cache.
///
/// The message-level operations (point query, whole-response ingestion) are
/// exercised by the resolver against the concrete store; this port carries
/// only what outer layers need: the owner-provided sweep timer hook and
/// administrative flush.
pub trait DnsCachePort: Send + Sync {
    fn cache_size(&self) -> usize;

    fn cache_metrics_snapshot(&self) -> CacheMetricsSnapshot;

    /// Remove every stale RRset and drop entries left empty. Returns the
    /// number of record sets removed. Called from a background job, never
    /// self-scheduled.
    fn remove_expired_records(&self) -> usize;

    /// Drop everything except the permanent root entry.
    fn flush(&self);
}
