//! Boreal DNS Application Layer
//!
//! Ports (async traits) expressing the collaborator contracts between the
//! resolution engine and its consumers, plus the thin use cases the binary
//! drives. No I/O happens here.

pub mod ports;
pub mod use_cases;

pub use ports::dns_cache::{CacheMetricsSnapshot, DnsCachePort};
pub use ports::dns_resolver::{DnsResolution, DnsResolver};
pub use use_cases::resolve::ResolveQueryUseCase;
