use boreal_dns_domain::RecordType;
use hickory_proto::rr::RecordType as WireRecordType;

/// Mapping between the domain-level record type and the wire codec's.
pub struct RecordTypeMapper;

impl RecordTypeMapper {
    /// Domain type → wire type (for building queries).
    pub fn to_wire(record_type: RecordType) -> WireRecordType {
        match record_type {
            RecordType::A => WireRecordType::A,
            RecordType::AAAA => WireRecordType::AAAA,
            RecordType::NS => WireRecordType::NS,
            RecordType::CNAME => WireRecordType::CNAME,
            RecordType::DNAME => WireRecordType::ANAME,
            RecordType::SOA => WireRecordType::SOA,
            RecordType::PTR => WireRecordType::PTR,
            RecordType::MX => WireRecordType::MX,
            RecordType::TXT => WireRecordType::TXT,
            RecordType::SRV => WireRecordType::SRV,
            RecordType::NAPTR => WireRecordType::NAPTR,
            RecordType::DS => WireRecordType::DS,
            RecordType::DNSKEY => WireRecordType::DNSKEY,
            RecordType::RRSIG => WireRecordType::RRSIG,
            RecordType::NSEC => WireRecordType::NSEC,
            RecordType::NSEC3 => WireRecordType::NSEC3,
            RecordType::NSEC3PARAM => WireRecordType::NSEC3PARAM,
            RecordType::SVCB => WireRecordType::SVCB,
            RecordType::HTTPS => WireRecordType::HTTPS,
            RecordType::CAA => WireRecordType::CAA,
            RecordType::TLSA => WireRecordType::TLSA,
            RecordType::SSHFP => WireRecordType::SSHFP,
            RecordType::OPT => WireRecordType::OPT,
            RecordType::ANY => WireRecordType::ANY,
        }
    }

    /// Wire type → domain type. `None` for types the engine does not
    /// surface to callers.
    pub fn from_wire(wire_type: WireRecordType) -> Option<RecordType> {
        match wire_type {
            WireRecordType::A => Some(RecordType::A),
            WireRecordType::AAAA => Some(RecordType::AAAA),
            WireRecordType::NS => Some(RecordType::NS),
            WireRecordType::CNAME => Some(RecordType::CNAME),
            WireRecordType::ANAME => Some(RecordType::DNAME),
            WireRecordType::SOA => Some(RecordType::SOA),
            WireRecordType::PTR => Some(RecordType::PTR),
            WireRecordType::MX => Some(RecordType::MX),
            WireRecordType::TXT => Some(RecordType::TXT),
            WireRecordType::SRV => Some(RecordType::SRV),
            WireRecordType::NAPTR => Some(RecordType::NAPTR),
            WireRecordType::DS => Some(RecordType::DS),
            WireRecordType::DNSKEY => Some(RecordType::DNSKEY),
            WireRecordType::RRSIG => Some(RecordType::RRSIG),
            WireRecordType::NSEC => Some(RecordType::NSEC),
            WireRecordType::NSEC3 => Some(RecordType::NSEC3),
            WireRecordType::NSEC3PARAM => Some(RecordType::NSEC3PARAM),
            WireRecordType::SVCB => Some(RecordType::SVCB),
            WireRecordType::HTTPS => Some(RecordType::HTTPS),
            WireRecordType::CAA => Some(RecordType::CAA),
            WireRecordType::TLSA => Some(RecordType::TLSA),
            WireRecordType::SSHFP => Some(RecordType::SSHFP),
            WireRecordType::OPT => Some(RecordType::OPT),
            WireRecordType::ANY => Some(RecordType::ANY),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_supported_types() {
        for rt in [
            RecordType::A,
            RecordType::AAAA,
            RecordType::NS,
            RecordType::DS,
            RecordType::DNSKEY,
            RecordType::HTTPS,
            RecordType::ANY,
        ] {
            assert_eq!(RecordTypeMapper::from_wire(RecordTypeMapper::to_wire(rt)), Some(rt));
        }
    }

    #[test]
    fn unknown_wire_types_are_dropped() {
        assert_eq!(RecordTypeMapper::from_wire(WireRecordType::Unknown(4242)), None);
    }
}
