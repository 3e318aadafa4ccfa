use super::expiry::Expiry;
use crate::dns::dnssec::DnssecStatus;
use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::{Name, Record, RecordType};
use hickory_proto::serialize::binary::{BinEncodable, BinEncoder};
use std::time::Instant;

/// Extended DNS Error (RFC 8914) carried by cached failure records so
/// diagnostic history survives repeated failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedDnsError {
    pub info_code: u16,
    pub extra_text: String,
}

/// EDNS option code for Extended DNS Errors.
const EDE_OPTION_CODE: u16 = 15;

/// Extract Extended DNS Errors from a message's EDNS options.
///
/// The option list is walked on the wire form of the OPT RDATA (a plain
/// sequence of `{code u16, length u16, data}` triples) so no assumptions
/// are made about how the codec models individual options.
pub fn extract_extended_errors(message: &Message) -> Vec<ExtendedDnsError> {
    let Some(edns) = message.extensions().as_ref() else {
        return Vec::new();
    };

    let mut wire = Vec::with_capacity(64);
    {
        let mut encoder = BinEncoder::new(&mut wire);
        if edns.options().emit(&mut encoder).is_err() {
            return Vec::new();
        }
    }

    let mut errors = Vec::new();
    let mut pos = 0usize;
    while pos + 4 <= wire.len() {
        let code = u16::from_be_bytes([wire[pos], wire[pos + 1]]);
        let len = u16::from_be_bytes([wire[pos + 2], wire[pos + 3]]) as usize;
        pos += 4;
        if pos + len > wire.len() {
            break;
        }
        if code == EDE_OPTION_CODE && len >= 2 {
            let info_code = u16::from_be_bytes([wire[pos], wire[pos + 1]]);
            let extra_text = String::from_utf8_lossy(&wire[pos + 2..pos + len]).into_owned();
            errors.push(ExtendedDnsError {
                info_code,
                extra_text,
            });
        }
        pos += len;
    }

    errors
}

/// Emit the RDATA of a record to wire bytes.
pub fn rdata_wire(record: &Record) -> Option<Vec<u8>> {
    let rdata = record.data();
    let mut buf = Vec::with_capacity(64);
    let mut encoder = BinEncoder::new(&mut buf);
    rdata.emit(&mut encoder).ok()?;
    Some(buf)
}

/// Frozen copy of an original response's sections, letting a single cached
/// record reproduce a negative or error response verbatim on replay.
///
/// The `*_plain` copies have DNSSEC metadata (RRSIG/NSEC/NSEC3/DS/DNSKEY)
/// stripped, for replay to clients that did not set DNSSEC OK.
#[derive(Debug, Clone)]
pub struct StoredResponse {
    pub rcode: ResponseCode,
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub additionals: Vec<Record>,
    pub answers_plain: Vec<Record>,
    pub authorities_plain: Vec<Record>,
    pub extended_errors: Vec<ExtendedDnsError>,
}

fn is_dnssec_metadata(rt: RecordType) -> bool {
    matches!(
        rt,
        RecordType::RRSIG
            | RecordType::NSEC
            | RecordType::NSEC3
            | RecordType::NSEC3PARAM
            | RecordType::DNSKEY
            | RecordType::DS
    )
}

fn strip_dnssec(records: &[Record]) -> Vec<Record> {
    records
        .iter()
        .filter(|r| !is_dnssec_metadata(r.record_type()))
        .cloned()
        .collect()
}

impl StoredResponse {
    pub fn from_message(message: &Message) -> Self {
        let answers: Vec<Record> = message.answers().to_vec();
        let authorities: Vec<Record> = message.name_servers().to_vec();
        let additionals: Vec<Record> = message
            .additionals()
            .iter()
            .filter(|r| r.record_type() != RecordType::OPT)
            .cloned()
            .collect();

        Self {
            rcode: message.response_code(),
            answers_plain: strip_dnssec(&answers),
            authorities_plain: strip_dnssec(&authorities),
            answers,
            authorities,
            additionals,
            extended_errors: extract_extended_errors(message),
        }
    }

    /// Answer and authority sections as they should be replayed, depending
    /// on whether the client asked for DNSSEC records.
    pub fn sections(&self, dnssec_ok: bool) -> (&[Record], &[Record]) {
        if dnssec_ok {
            (&self.answers, &self.authorities)
        } else {
            (&self.answers_plain, &self.authorities_plain)
        }
    }
}

/// Special-record classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialKind {
    /// RFC 2308 negative answer (NXDOMAIN or NODATA).
    Negative,
    /// Upstream failure (SERVFAIL, refused, no response).
    Failure,
    /// Response that failed DNSSEC validation.
    Bad,
    /// Response withheld by policy.
    Blocked,
}

/// Cached record data: either an ordinary resource record or a special
/// record wrapping a whole stored response.
///
/// Matching on the tag is the single way the cache distinguishes special
/// records; an RRset is either entirely special or entirely ordinary.
#[derive(Debug, Clone)]
pub enum CachedData {
    Ordinary(Record),
    Negative(Box<StoredResponse>),
    Failure(Box<StoredResponse>),
    Bad(Box<StoredResponse>),
    Blocked(Box<StoredResponse>),
}

impl CachedData {
    pub fn special_kind(&self) -> Option<SpecialKind> {
        match self {
            CachedData::Ordinary(_) => None,
            CachedData::Negative(_) => Some(SpecialKind::Negative),
            CachedData::Failure(_) => Some(SpecialKind::Failure),
            CachedData::Bad(_) => Some(SpecialKind::Bad),
            CachedData::Blocked(_) => Some(SpecialKind::Blocked),
        }
    }

    pub fn is_special(&self) -> bool {
        self.special_kind().is_some()
    }

    /// Failure-shaped records must never displace useful data.
    pub fn is_failure_like(&self) -> bool {
        matches!(
            self.special_kind(),
            Some(SpecialKind::Failure) | Some(SpecialKind::Bad)
        )
    }

    pub fn stored(&self) -> Option<&StoredResponse> {
        match self {
            CachedData::Ordinary(_) => None,
            CachedData::Negative(s)
            | CachedData::Failure(s)
            | CachedData::Bad(s)
            | CachedData::Blocked(s) => Some(s),
        }
    }

    pub fn stored_mut(&mut self) -> Option<&mut StoredResponse> {
        match self {
            CachedData::Ordinary(_) => None,
            CachedData::Negative(s)
            | CachedData::Failure(s)
            | CachedData::Bad(s)
            | CachedData::Blocked(s) => Some(s),
        }
    }
}

/// Records derived from the same response and attached to a cached record
/// as an explicit side table (not separate cache entries): glue addresses
/// for NS/MX/SRV/SVCB targets, RRSIGs covering the set, and NSEC records
/// proving a wildcard expansion.
#[derive(Debug, Clone, Default)]
pub struct DerivedRecords {
    pub glue: Vec<Record>,
    pub rrsigs: Vec<Record>,
    pub nsec_proofs: Vec<Record>,
}

impl DerivedRecords {
    pub fn is_empty(&self) -> bool {
        self.glue.is_empty() && self.rrsigs.is_empty() && self.nsec_proofs.is_empty()
    }
}

/// A single cached record: immutable once ingested except for the one-time
/// expiry assignment.
#[derive(Debug, Clone)]
pub struct CachedRecord {
    owner: Name,
    rtype: RecordType,
    ttl: u32,
    data: CachedData,
    expiry: Option<Expiry>,
    pub derived: DerivedRecords,
    pub dnssec_status: DnssecStatus,
}

impl CachedRecord {
    pub fn ordinary(record: Record) -> Self {
        let owner = record.name().clone();
        let rtype = record.record_type();
        let ttl = record.ttl();
        Self {
            owner,
            rtype,
            ttl,
            data: CachedData::Ordinary(record),
            expiry: None,
            derived: DerivedRecords::default(),
            dnssec_status: DnssecStatus::Unknown,
        }
    }

    pub fn special(owner: Name, rtype: RecordType, ttl: u32, data: CachedData) -> Self {
        debug_assert!(data.is_special());
        Self {
            owner,
            rtype,
            ttl,
            data,
            expiry: None,
            derived: DerivedRecords::default(),
            dnssec_status: DnssecStatus::Indeterminate,
        }
    }

    pub fn owner(&self) -> &Name {
        &self.owner
    }

    pub fn record_type(&self) -> RecordType {
        self.rtype
    }

    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    pub fn data(&self) -> &CachedData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut CachedData {
        &mut self.data
    }

    pub fn record(&self) -> Option<&Record> {
        match &self.data {
            CachedData::Ordinary(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_special(&self) -> bool {
        self.data.is_special()
    }

    /// One-shot expiry assignment. A second call is ignored; expiry is
    /// never cleared.
    pub fn set_expiry(&mut self, serve_stale_ttl: u32, now: Instant) {
        if self.expiry.is_none() {
            self.expiry = Some(Expiry::at(now, self.ttl, serve_stale_ttl));
        }
    }

    pub fn set_permanent(&mut self) {
        if self.expiry.is_none() {
            self.expiry = Some(Expiry::permanent());
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expiry.map_or(false, |e| e.is_expired(now))
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        self.expiry.map_or(false, |e| e.is_stale(now))
    }

    pub fn effective_ttl(&self, now: Instant) -> u32 {
        self.expiry.map_or(self.ttl, |e| e.effective_ttl(now))
    }

    /// Clone of the underlying record with its TTL rewritten to the
    /// remaining effective TTL, for replay in a response.
    pub fn replay_record(&self, now: Instant) -> Option<Record> {
        let record = self.record()?;
        let mut out = record.clone();
        out.set_ttl(self.effective_ttl(now));
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::RData;
    use std::str::FromStr;
    use std::time::Duration;

    fn a_record(name: &str, ttl: u32, addr: [u8; 4]) -> Record {
        Record::from_rdata(
            Name::from_str(name).unwrap(),
            ttl,
            RData::A(A::new(addr[0], addr[1], addr[2], addr[3])),
        )
    }

    #[test]
    fn expiry_is_set_once() {
        let now = Instant::now();
        let mut record = CachedRecord::ordinary(a_record("example.com.", 60, [192, 0, 2, 1]));
        record.set_expiry(0, now);
        let first = record.effective_ttl(now + Duration::from_secs(10));

        // A later set_expiry must not reset the horizon.
        record.set_expiry(0, now + Duration::from_secs(40));
        assert_eq!(record.effective_ttl(now + Duration::from_secs(10)), first);
        assert!(record.is_stale(now + Duration::from_secs(60)));
    }

    #[test]
    fn replay_rewrites_ttl() {
        let now = Instant::now();
        let mut record = CachedRecord::ordinary(a_record("example.com.", 300, [192, 0, 2, 1]));
        record.set_expiry(0, now);

        let replayed = record.replay_record(now + Duration::from_secs(100)).unwrap();
        assert!(replayed.ttl() <= 200);
    }

    #[test]
    fn special_records_are_never_ordinary() {
        let stored = StoredResponse {
            rcode: ResponseCode::NXDomain,
            answers: vec![],
            authorities: vec![],
            additionals: vec![],
            answers_plain: vec![],
            authorities_plain: vec![],
            extended_errors: vec![],
        };
        let record = CachedRecord::special(
            Name::from_str("missing.example.com.").unwrap(),
            RecordType::A,
            300,
            CachedData::Negative(Box::new(stored)),
        );
        assert!(record.is_special());
        assert!(record.record().is_none());
        assert_eq!(record.data().special_kind(), Some(SpecialKind::Negative));
        assert!(!record.data().is_failure_like());
    }

    #[test]
    fn dnssec_metadata_is_stripped_from_plain_sections() {
        let records = vec![a_record("example.com.", 60, [192, 0, 2, 1])];
        let plain = strip_dnssec(&records);
        assert_eq!(plain.len(), 1);
    }
}
