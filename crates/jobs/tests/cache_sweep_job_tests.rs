use boreal_dns_application::{CacheMetricsSnapshot, DnsCachePort};
use boreal_dns_jobs::{CacheSweepJob, JobRunner};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct MockCache {
    sweeps: AtomicUsize,
    flushes: AtomicUsize,
}

impl DnsCachePort for MockCache {
    fn cache_size(&self) -> usize {
        0
    }

    fn cache_metrics_snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot::default()
    }

    fn remove_expired_records(&self) -> usize {
        self.sweeps.fetch_add(1, Ordering::SeqCst);
        3
    }

    fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn sweep_runs_on_interval() {
    let cache = Arc::new(MockCache::default());
    let job = CacheSweepJob::new(cache.clone() as Arc<dyn DnsCachePort>, 1);
    Arc::new(job).start().await;

    tokio::time::sleep(Duration::from_millis(2200)).await;
    assert!(cache.sweeps.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn cancellation_stops_the_job() {
    let cache = Arc::new(MockCache::default());
    let token = CancellationToken::new();
    let job = CacheSweepJob::new(cache.clone() as Arc<dyn DnsCachePort>, 1)
        .with_cancellation(token.clone());
    Arc::new(job).start().await;

    token.cancel();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let after_cancel = cache.sweeps.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(cache.sweeps.load(Ordering::SeqCst), after_cancel);
}

#[tokio::test]
async fn runner_starts_registered_jobs() {
    let cache = Arc::new(MockCache::default());
    JobRunner::new()
        .with_cache_sweep(CacheSweepJob::new(cache.clone() as Arc<dyn DnsCachePort>, 1))
        .start()
        .await;

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(cache.sweeps.load(Ordering::SeqCst) >= 1);
}
