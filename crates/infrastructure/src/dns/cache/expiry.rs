use boreal_dns_domain::config::cache::SERVE_STALE_TTL_CAP;
use boreal_dns_domain::CacheConfig;
use std::time::{Duration, Instant};

/// Effective-TTL floor applied once a record is past TTL expiry but still
/// inside its serve-stale window.
pub const STALE_WINDOW_TTL: u32 = 30;

/// Expiry horizon used for the permanent root entry (never reached in the
/// life of a process).
const PERMANENT_SECS: u64 = 10 * 365 * 24 * 3600;

/// TTL clamping and serve-stale policy, derived from [`CacheConfig`] once
/// at store construction.
#[derive(Debug, Clone, Copy)]
pub struct TtlPolicy {
    pub minimum_ttl: u32,
    pub maximum_ttl: u32,
    pub serve_stale_ttl: u32,
    pub serve_stale_answer_ttl: u32,
    pub negative_ttl: u32,
    pub failure_ttl: u32,
}

impl TtlPolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            minimum_ttl: config.minimum_ttl,
            maximum_ttl: config.maximum_ttl,
            serve_stale_ttl: config.serve_stale_ttl.min(SERVE_STALE_TTL_CAP),
            serve_stale_answer_ttl: config.serve_stale_answer_ttl,
            negative_ttl: config.negative_ttl,
            failure_ttl: config.failure_ttl,
        }
    }

    /// Clamp an upstream TTL into `[minimum_ttl, maximum_ttl]`.
    pub fn clamp(&self, ttl: u32) -> u32 {
        ttl.clamp(self.minimum_ttl, self.maximum_ttl)
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

/// Absolute expiry state of a cached record. Set once when the record is
/// ingested, never cleared.
///
/// `expires_at` is the TTL horizon; `stale_expires_at` adds the serve-stale
/// window on top. A record between the two may still be served (with a
/// floored TTL) while upstream resolution is failing; past
/// `stale_expires_at` it is dead and eligible for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry {
    expires_at: Instant,
    stale_expires_at: Instant,
}

impl Expiry {
    pub fn new(ttl: u32, serve_stale_ttl: u32) -> Self {
        Self::at(Instant::now(), ttl, serve_stale_ttl)
    }

    /// Time-injected constructor; tests pin `now`.
    pub fn at(now: Instant, ttl: u32, serve_stale_ttl: u32) -> Self {
        let serve_stale = serve_stale_ttl.min(SERVE_STALE_TTL_CAP);
        let expires_at = now + Duration::from_secs(u64::from(ttl));
        Self {
            expires_at,
            stale_expires_at: expires_at + Duration::from_secs(u64::from(serve_stale)),
        }
    }

    /// Expiry for synthetic records that must outlive any sweep (the root
    /// NS set).
    pub fn permanent() -> Self {
        let horizon = Instant::now() + Duration::from_secs(PERMANENT_SECS);
        Self {
            expires_at: horizon,
            stale_expires_at: horizon,
        }
    }

    /// Past the TTL horizon (but possibly still servable stale).
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Past the serve-stale horizon: the record must no longer be served
    /// and may be swept.
    pub fn is_stale(&self, now: Instant) -> bool {
        now >= self.stale_expires_at
    }

    /// Remaining TTL in seconds: the true remainder before expiry, the
    /// 30-second stale floor inside the serve-stale window, zero after.
    pub fn effective_ttl(&self, now: Instant) -> u32 {
        if now < self.expires_at {
            let remaining = (self.expires_at - now).as_secs();
            remaining.min(u64::from(u32::MAX)) as u32
        } else if now < self.stale_expires_at {
            STALE_WINDOW_TTL
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_exactly_at_serve_stale_expiry() {
        let now = Instant::now();
        let expiry = Expiry::at(now, 60, 120);

        assert!(!expiry.is_stale(now));
        assert!(!expiry.is_stale(now + Duration::from_secs(60)));
        assert!(!expiry.is_stale(now + Duration::from_secs(179)));
        assert!(expiry.is_stale(now + Duration::from_secs(180)));
        assert!(expiry.is_stale(now + Duration::from_secs(10_000)));
    }

    #[test]
    fn effective_ttl_monotonic_until_floor() {
        let now = Instant::now();
        let expiry = Expiry::at(now, 300, 600);

        let mut last = u32::MAX;
        for offset in 0..300 {
            let ttl = expiry.effective_ttl(now + Duration::from_secs(offset));
            assert!(ttl <= last);
            last = ttl;
        }
        // Inside the serve-stale window the TTL is floored, not zero.
        assert_eq!(
            expiry.effective_ttl(now + Duration::from_secs(301)),
            STALE_WINDOW_TTL
        );
        assert_eq!(
            expiry.effective_ttl(now + Duration::from_secs(899)),
            STALE_WINDOW_TTL
        );
        // Past serve-stale it is dead.
        assert_eq!(expiry.effective_ttl(now + Duration::from_secs(900)), 0);
    }

    #[test]
    fn serve_stale_window_capped_at_seven_days() {
        let now = Instant::now();
        let expiry = Expiry::at(now, 0, u32::MAX);
        let cap = Duration::from_secs(u64::from(SERVE_STALE_TTL_CAP));

        assert!(!expiry.is_stale(now + cap - Duration::from_secs(1)));
        assert!(expiry.is_stale(now + cap));
    }

    #[test]
    fn permanent_never_expires() {
        let expiry = Expiry::permanent();
        let later = Instant::now() + Duration::from_secs(365 * 24 * 3600);
        assert!(!expiry.is_stale(later));
        assert!(expiry.effective_ttl(later) > 0);
    }

    #[test]
    fn clamp_applies_bounds() {
        let policy = TtlPolicy {
            minimum_ttl: 10,
            maximum_ttl: 600,
            serve_stale_ttl: 0,
            serve_stale_answer_ttl: 30,
            negative_ttl: 300,
            failure_ttl: 10,
        };
        assert_eq!(policy.clamp(5), 10);
        assert_eq!(policy.clamp(60), 60);
        assert_eq!(policy.clamp(86_400), 600);
    }
}
