use async_trait::async_trait;
use boreal_dns_domain::{DnsQuery, DomainError};
use bytes::Bytes;
use std::net::IpAddr;
use std::sync::{Arc, LazyLock};

pub static EMPTY_CNAME_CHAIN: LazyLock<Arc<[Arc<str>]>> = LazyLock::new(|| Arc::from([]));

/// Outcome of a resolution, shaped for callers that want addresses rather
/// than wire messages.
#[derive(Debug, Clone)]
pub struct DnsResolution {
    pub addresses: Arc<Vec<IpAddr>>,
    pub cache_hit: bool,
    /// DNSSEC status name ("Secure", "Insecure", "Bogus", "Indeterminate",
    /// "Disabled").
    pub dnssec_status: Option<&'static str>,
    pub cname_chain: Arc<[Arc<str>]>,
    pub min_ttl: Option<u32>,
    /// SOA minimum TTL from the authority section of a negative answer.
    pub negative_soa_ttl: Option<u32>,
    /// Wire bytes of the complete response. Opaque to the application
    /// layer; consumed by infrastructure and diagnostics.
    pub wire_response: Option<Bytes>,
}

impl DnsResolution {
    pub fn new(addresses: Vec<IpAddr>, cache_hit: bool) -> Self {
        Self {
            addresses: Arc::new(addresses),
            cache_hit,
            dnssec_status: None,
            cname_chain: Arc::clone(&EMPTY_CNAME_CHAIN),
            min_ttl: None,
            negative_soa_ttl: None,
            wire_response: None,
        }
    }
}

#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn resolve(&self, query: &DnsQuery) -> Result<DnsResolution, DomainError>;
}
