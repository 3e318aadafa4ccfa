use boreal_dns_application::DnsCachePort;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Periodic expired-record sweep. The cache never schedules its own
/// cleanup; this job is the owner-provided timer.
pub struct CacheSweepJob {
    cache: Arc<dyn DnsCachePort>,
    interval_secs: u64,
    shutdown: CancellationToken,
}

impl CacheSweepJob {
    pub fn new(cache: Arc<dyn DnsCachePort>, interval_secs: u64) -> Self {
        Self {
            cache,
            interval_secs: interval_secs.max(1),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub async fn start(self: Arc<Self>) {
        info!(interval_secs = self.interval_secs, "Starting cache sweep job");

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
            // The first tick fires immediately; skip it so a fresh cache
            // is not swept at startup.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        info!("CacheSweepJob: shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let removed = self.cache.remove_expired_records();
                        if removed > 0 {
                            debug!(removed, entries = self.cache.cache_size(), "Cache sweep completed");
                        }
                    }
                }
            }
        });
    }
}
