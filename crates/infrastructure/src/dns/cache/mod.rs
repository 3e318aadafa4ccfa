// Response cache: owner-name map of per-type record sets with RFC 2308
// negative caching, special failure records and serve-stale expiry.

pub mod classify;
pub mod entry;
pub mod expiry;
pub mod metrics;
pub mod record;
pub mod storage;

pub use entry::{CacheEntry, RecordSet, SetKey};
pub use expiry::{Expiry, TtlPolicy, STALE_WINDOW_TTL};
pub use metrics::CacheMetrics;
pub use record::{CachedData, CachedRecord, DerivedRecords, ExtendedDnsError, StoredResponse};
pub use storage::RecordCache;
