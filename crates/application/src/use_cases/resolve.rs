use crate::ports::dns_resolver::{DnsResolution, DnsResolver};
use boreal_dns_domain::{validators, DnsQuery, DomainError};
use std::sync::Arc;
use tracing::debug;

/// Resolve a single question through the configured resolver.
///
/// Validates the name before anything touches the network, so syntactically
/// broken input never produces a cache entry or an outbound query.
pub struct ResolveQueryUseCase {
    resolver: Arc<dyn DnsResolver>,
}

impl ResolveQueryUseCase {
    pub fn new(resolver: Arc<dyn DnsResolver>) -> Self {
        Self { resolver }
    }

    pub async fn execute(&self, query: &DnsQuery) -> Result<DnsResolution, DomainError> {
        validators::validate_domain_name(&query.domain).map_err(DomainError::InvalidDomainName)?;

        let resolution = self.resolver.resolve(query).await?;

        debug!(
            domain = %query.domain,
            record_type = %query.record_type,
            addresses = resolution.addresses.len(),
            cache_hit = resolution.cache_hit,
            dnssec = resolution.dnssec_status.unwrap_or("Disabled"),
            "Query resolved"
        );

        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use boreal_dns_domain::RecordType;
    use std::net::{IpAddr, Ipv4Addr};

    struct FixedResolver;

    #[async_trait]
    impl DnsResolver for FixedResolver {
        async fn resolve(&self, _query: &DnsQuery) -> Result<DnsResolution, DomainError> {
            Ok(DnsResolution::new(
                vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))],
                false,
            ))
        }
    }

    #[tokio::test]
    async fn rejects_invalid_names_before_resolving() {
        let use_case = ResolveQueryUseCase::new(Arc::new(FixedResolver));
        let query = DnsQuery::new("bad name.example", RecordType::A);
        let err = use_case.execute(&query).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidDomainName(_)));
    }

    #[tokio::test]
    async fn passes_valid_names_through() {
        let use_case = ResolveQueryUseCase::new(Arc::new(FixedResolver));
        let query = DnsQuery::new("example.com", RecordType::A);
        let resolution = use_case.execute(&query).await.unwrap();
        assert_eq!(resolution.addresses.len(), 1);
    }
}
