use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// DNS record types understood by the resolution engine.
///
/// The wire codec has its own richer type enum; this domain-level one covers
/// what the cache and resolver actually reason about and what the CLI
/// accepts. The infrastructure layer maps between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    A,
    AAAA,
    NS,
    CNAME,
    DNAME,
    SOA,
    PTR,
    MX,
    TXT,
    SRV,
    NAPTR,
    DS,
    DNSKEY,
    RRSIG,
    NSEC,
    NSEC3,
    NSEC3PARAM,
    SVCB,
    HTTPS,
    CAA,
    TLSA,
    SSHFP,
    OPT,
    ANY,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::AAAA => "AAAA",
            Self::NS => "NS",
            Self::CNAME => "CNAME",
            Self::DNAME => "DNAME",
            Self::SOA => "SOA",
            Self::PTR => "PTR",
            Self::MX => "MX",
            Self::TXT => "TXT",
            Self::SRV => "SRV",
            Self::NAPTR => "NAPTR",
            Self::DS => "DS",
            Self::DNSKEY => "DNSKEY",
            Self::RRSIG => "RRSIG",
            Self::NSEC => "NSEC",
            Self::NSEC3 => "NSEC3",
            Self::NSEC3PARAM => "NSEC3PARAM",
            Self::SVCB => "SVCB",
            Self::HTTPS => "HTTPS",
            Self::CAA => "CAA",
            Self::TLSA => "TLSA",
            Self::SSHFP => "SSHFP",
            Self::OPT => "OPT",
            Self::ANY => "ANY",
        }
    }

    /// DNSSEC metadata types (stripped from responses replayed to clients
    /// that did not ask for DNSSEC).
    pub fn is_dnssec(&self) -> bool {
        matches!(
            self,
            Self::DS | Self::DNSKEY | Self::RRSIG | Self::NSEC | Self::NSEC3 | Self::NSEC3PARAM
        )
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        let rt = match upper.as_str() {
            "A" => Self::A,
            "AAAA" => Self::AAAA,
            "NS" => Self::NS,
            "CNAME" => Self::CNAME,
            "DNAME" => Self::DNAME,
            "SOA" => Self::SOA,
            "PTR" => Self::PTR,
            "MX" => Self::MX,
            "TXT" => Self::TXT,
            "SRV" => Self::SRV,
            "NAPTR" => Self::NAPTR,
            "DS" => Self::DS,
            "DNSKEY" => Self::DNSKEY,
            "RRSIG" => Self::RRSIG,
            "NSEC" => Self::NSEC,
            "NSEC3" => Self::NSEC3,
            "NSEC3PARAM" => Self::NSEC3PARAM,
            "SVCB" => Self::SVCB,
            "HTTPS" => Self::HTTPS,
            "CAA" => Self::CAA,
            "TLSA" => Self::TLSA,
            "SSHFP" => Self::SSHFP,
            "OPT" => Self::OPT,
            "ANY" | "*" => Self::ANY,
            _ => return Err(format!("Unknown record type: {s}")),
        };
        Ok(rt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrip() {
        for rt in [RecordType::A, RecordType::NS, RecordType::DNSKEY, RecordType::HTTPS] {
            assert_eq!(rt.as_str().parse::<RecordType>().unwrap(), rt);
        }
        assert_eq!("aaaa".parse::<RecordType>().unwrap(), RecordType::AAAA);
        assert_eq!("*".parse::<RecordType>().unwrap(), RecordType::ANY);
        assert!("BOGUS".parse::<RecordType>().is_err());
    }

    #[test]
    fn dnssec_types() {
        assert!(RecordType::RRSIG.is_dnssec());
        assert!(RecordType::NSEC3.is_dnssec());
        assert!(!RecordType::A.is_dnssec());
        assert!(!RecordType::NS.is_dnssec());
    }
}
