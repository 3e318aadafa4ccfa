use thiserror::Error;

/// Classified resolution errors surfaced to callers.
///
/// Transport failures are never surfaced raw; the resolver wraps them into
/// one of these variants so a caller can always distinguish "the name is
/// bad", "the name does not exist", "the servers failed" and "the answer
/// failed DNSSEC validation".
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid domain name: {0}")]
    InvalidDomainName(String),

    /// NXDOMAIN: authoritative denial of the queried name.
    #[error("Name does not exist: {0}")]
    NameError(String),

    #[error("Server failure resolving {domain}: {reason}")]
    ServerFailure { domain: String, reason: String },

    /// DNSSEC validation failure with the offending response attached as
    /// opaque wire bytes (the domain layer does not parse DNS messages).
    #[error("DNSSEC validation failed for {domain}: {reason}")]
    DnssecValidationFailed {
        domain: String,
        reason: String,
        response: Option<Vec<u8>>,
    },

    #[error("TSIG verification failed: {0}")]
    TsigVerificationFailed(String),

    #[error("Invalid DNS response: {0}")]
    InvalidDnsResponse(String),

    #[error("Resolution stack depth exceeded ({0})")]
    StackDepthExceeded(usize),

    #[error("Query timeout")]
    QueryTimeout,

    #[error("Timeout waiting for {server}")]
    TransportTimeout { server: String },

    #[error("Connection refused by {server}")]
    TransportConnectionRefused { server: String },

    #[error("Connection reset by {server}")]
    TransportConnectionReset { server: String },

    #[error("No name servers available")]
    NoNameServers,

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl DomainError {
    /// True for errors caused by the network path rather than DNS content.
    /// The resolver uses this to decide whether trying the next server can
    /// help.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            DomainError::QueryTimeout
                | DomainError::TransportTimeout { .. }
                | DomainError::TransportConnectionRefused { .. }
                | DomainError::TransportConnectionReset { .. }
                | DomainError::NoNameServers
                | DomainError::IoError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_classified() {
        assert!(DomainError::QueryTimeout.is_transport_error());
        assert!(DomainError::TransportTimeout {
            server: "198.51.100.1:53".into()
        }
        .is_transport_error());
        assert!(!DomainError::NameError("example.invalid".into()).is_transport_error());
        assert!(!DomainError::DnssecValidationFailed {
            domain: "example.com".into(),
            reason: "bogus RRSIG".into(),
            response: None,
        }
        .is_transport_error());
    }
}
