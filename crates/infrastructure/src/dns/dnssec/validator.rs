use super::crypto::SignatureVerifier;
use super::nsec::verify_negative_proof;
use super::types::{DnskeyRecord, DnssecStatus, DsRecord, RrsigRecord};
use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::{Name, Record, RecordType};
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

/// Validated DNSKEY sets by zone, built up by the resolver as it extends
/// the chain of trust from the anchor downwards.
#[derive(Debug, Default, Clone)]
pub struct KeyRing {
    keys: FxHashMap<String, Vec<DnskeyRecord>>,
}

fn zone_key(zone: &Name) -> String {
    let mut n = zone.to_lowercase();
    n.set_fqdn(true);
    n.to_ascii()
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, zone: &Name, keys: Vec<DnskeyRecord>) {
        self.keys.insert(zone_key(zone), keys);
    }

    pub fn keys_for(&self, signer: &Name) -> Option<&[DnskeyRecord]> {
        self.keys.get(&zone_key(signer)).map(Vec::as_slice)
    }

    pub fn contains_zone(&self, zone: &Name) -> bool {
        self.keys.contains_key(&zone_key(zone))
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Distinct signer names appearing in a message's RRSIGs, for the resolver
/// to resolve DNSKEY sets for before validation.
pub fn signer_names(response: &Message) -> Vec<Name> {
    let mut seen: Vec<Name> = Vec::new();
    for record in response
        .answers()
        .iter()
        .chain(response.name_servers())
        .chain(response.additionals())
    {
        if let Some(rrsig) = RrsigRecord::from_record(record) {
            let signer = rrsig.signer_name.to_lowercase();
            if !seen.contains(&signer) {
                seen.push(signer);
            }
        }
    }
    seen
}

/// Result of validating one response.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub status: DnssecStatus,
    pub reason: Option<String>,
}

impl ValidationOutcome {
    fn secure() -> Self {
        Self {
            status: DnssecStatus::Secure,
            reason: None,
        }
    }

    fn bogus(reason: impl Into<String>) -> Self {
        Self {
            status: DnssecStatus::Bogus,
            reason: Some(reason.into()),
        }
    }

    fn indeterminate(reason: impl Into<String>) -> Self {
        Self {
            status: DnssecStatus::Indeterminate,
            reason: Some(reason.into()),
        }
    }

    pub fn is_bogus(&self) -> bool {
        self.status == DnssecStatus::Bogus
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RrsetVerdict {
    Secure,
    Unsigned,
    Bogus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Answer,
    Authority,
    Additional,
}

/// Per-response DNSSEC validation: every RRset in every section is
/// matched against a covering RRSIG and the keyring; negative answers
/// additionally need an NSEC/NSEC3 proof.
pub struct ResponseValidator {
    verifier: SignatureVerifier,
}

impl Default for ResponseValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseValidator {
    pub fn new() -> Self {
        Self {
            verifier: SignatureVerifier,
        }
    }

    /// Validate a DNSKEY RRset against the trusted DS set of its zone.
    /// Returns the full key set once at least one key matches a DS digest
    /// (that key vouches for the rest via the RRset signature, which is
    /// checked like any other RRset).
    pub fn validate_dnskey_rrset(
        &self,
        zone: &Name,
        dnskey_records: &[Record],
        ds_set: &[DsRecord],
    ) -> Result<Vec<DnskeyRecord>, String> {
        let keys: Vec<DnskeyRecord> = dnskey_records
            .iter()
            .filter_map(DnskeyRecord::from_record)
            .collect();
        if keys.is_empty() {
            return Err("no parseable DNSKEY records".to_string());
        }

        for ds in ds_set {
            for key in &keys {
                match self.verifier.verify_ds(ds, key, zone) {
                    Ok(true) => {
                        trace!(zone = %zone, key_tag = key.key_tag(), "DNSKEY matches DS");
                        return Ok(keys);
                    }
                    Ok(false) => {}
                    Err(e) => warn!(zone = %zone, error = %e, "DS verification error"),
                }
            }
        }

        Err(format!("no DNSKEY of {zone} matches the trusted DS set"))
    }

    /// Validate a full response against the keyring.
    ///
    /// Missing signatures are fatal in the answer section (except CNAMEs
    /// synthesized by a signed DNAME) and tolerated as Indeterminate in
    /// authority/additional; invalid signatures are fatal everywhere
    /// except the additional section. Negative answers must carry a
    /// verifiable NSEC/NSEC3 proof.
    pub fn validate_response(
        &self,
        response: &Message,
        keyring: &KeyRing,
        qname: &Name,
        qtype: RecordType,
    ) -> ValidationOutcome {
        if keyring.is_empty() {
            return ValidationOutcome::indeterminate("no validated keys available");
        }

        let rrsig_index = self.rrsig_index(response);
        let mut all_secure = true;

        for (section, records) in [
            (Section::Answer, response.answers()),
            (Section::Authority, response.name_servers()),
            (Section::Additional, response.additionals()),
        ] {
            for ((owner, rtype), rrset) in group_rrsets(records) {
                let verdict = self.verify_rrset(&owner, rtype, &rrset, &rrsig_index, keyring);
                match (section, verdict) {
                    (_, RrsetVerdict::Secure) => {}
                    (Section::Additional, _) => {
                        all_secure = false;
                    }
                    (Section::Answer, RrsetVerdict::Unsigned) => {
                        if rtype == RecordType::CNAME && has_signed_dname(response, &owner) {
                            // CNAME synthesized from a validated DNAME
                            // carries no signature of its own.
                            continue;
                        }
                        return ValidationOutcome::bogus(format!(
                            "unsigned answer RRset {owner} {rtype}"
                        ));
                    }
                    (Section::Answer, RrsetVerdict::Bogus) => {
                        return ValidationOutcome::bogus(format!(
                            "invalid signature on answer RRset {owner} {rtype}"
                        ));
                    }
                    (Section::Authority, RrsetVerdict::Bogus) => {
                        return ValidationOutcome::bogus(format!(
                            "invalid signature on authority RRset {owner} {rtype}"
                        ));
                    }
                    (Section::Authority, RrsetVerdict::Unsigned) => {
                        // Referral NS sets are never signed; tolerated.
                        all_secure = false;
                    }
                }
            }
        }

        // A negative answer (SOA in authority, nothing in answer) must be
        // backed by a proof of non-existence. Referrals (NS without SOA)
        // are not negative answers.
        let has_soa = response
            .name_servers()
            .iter()
            .any(|r| r.record_type() == RecordType::SOA);
        let negative = response.answers().is_empty()
            && has_soa
            && matches!(
                response.response_code(),
                ResponseCode::NXDomain | ResponseCode::NoError
            );
        if negative && !verify_negative_proof(response, qname, qtype) {
            return ValidationOutcome::bogus(format!(
                "negative response for {qname} {qtype} lacks a valid NSEC/NSEC3 proof"
            ));
        }

        if all_secure {
            debug!(qname = %qname, %qtype, "Response validated Secure");
            ValidationOutcome::secure()
        } else {
            ValidationOutcome::indeterminate("unsigned non-answer RRsets present")
        }
    }

    fn rrsig_index(&self, response: &Message) -> FxHashMap<(Name, RecordType), Vec<RrsigRecord>> {
        let mut index: FxHashMap<(Name, RecordType), Vec<RrsigRecord>> = FxHashMap::default();
        for record in response
            .answers()
            .iter()
            .chain(response.name_servers())
            .chain(response.additionals())
        {
            if let Some(rrsig) = RrsigRecord::from_record(record) {
                index
                    .entry((record.name().to_lowercase(), rrsig.type_covered))
                    .or_default()
                    .push(rrsig);
            }
        }
        index
    }

    fn verify_rrset(
        &self,
        owner: &Name,
        rtype: RecordType,
        rrset: &[Record],
        rrsig_index: &FxHashMap<(Name, RecordType), Vec<RrsigRecord>>,
        keyring: &KeyRing,
    ) -> RrsetVerdict {
        let Some(rrsigs) = rrsig_index.get(&(owner.clone(), rtype)) else {
            return RrsetVerdict::Unsigned;
        };

        for rrsig in rrsigs {
            let Some(keys) = keyring.keys_for(&rrsig.signer_name) else {
                continue;
            };
            for key in keys {
                match self.verifier.verify_rrsig(rrsig, key, rrset) {
                    Ok(true) => return RrsetVerdict::Secure,
                    Ok(false) => {}
                    Err(e) => {
                        trace!(owner = %owner, %rtype, error = %e, "RRSIG check skipped");
                    }
                }
            }
        }

        RrsetVerdict::Bogus
    }
}

/// Group a section's records into RRsets by (lowercased owner, type),
/// skipping OPT and the RRSIGs themselves.
fn group_rrsets(records: &[Record]) -> Vec<((Name, RecordType), Vec<Record>)> {
    let mut sets: Vec<((Name, RecordType), Vec<Record>)> = Vec::new();
    for record in records {
        let rtype = record.record_type();
        if rtype == RecordType::OPT || rtype == RecordType::RRSIG {
            continue;
        }
        let key = (record.name().to_lowercase(), rtype);
        match sets.iter_mut().find(|(k, _)| *k == key) {
            Some((_, set)) => set.push(record.clone()),
            None => sets.push((key, vec![record.clone()])),
        }
    }
    sets
}

/// True when the answer section holds a signed DNAME that an unsigned
/// CNAME at `cname_owner` could have been synthesized from.
fn has_signed_dname(response: &Message, cname_owner: &Name) -> bool {
    response.answers().iter().any(|r| {
        r.record_type() == RecordType::DNAME && r.name().to_lowercase().zone_of(cname_owner)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{MessageType, OpCode, Query};
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::RData;
    use std::str::FromStr;

    fn response(qname: &str, qtype: RecordType, rcode: ResponseCode) -> Message {
        let mut message = Message::new(1, MessageType::Response, OpCode::Query);
        let mut query = Query::new();
        query.set_name(Name::from_str(qname).unwrap());
        query.set_query_type(qtype);
        message.add_query(query);
        message.set_response_code(rcode);
        message
    }

    fn keyring_with_key(zone: &str) -> KeyRing {
        let mut keyring = KeyRing::new();
        keyring.insert(
            &Name::from_str(zone).unwrap(),
            vec![DnskeyRecord {
                flags: 256,
                protocol: 3,
                algorithm: 13,
                public_key: vec![0x22; 64],
            }],
        );
        keyring
    }

    #[test]
    fn empty_keyring_is_indeterminate() {
        let validator = ResponseValidator::new();
        let msg = response("example.com.", RecordType::A, ResponseCode::NoError);
        let outcome = validator.validate_response(
            &msg,
            &KeyRing::new(),
            &Name::from_str("example.com.").unwrap(),
            RecordType::A,
        );
        assert_eq!(outcome.status, DnssecStatus::Indeterminate);
    }

    #[test]
    fn unsigned_answer_is_bogus() {
        let validator = ResponseValidator::new();
        let mut msg = response("example.com.", RecordType::A, ResponseCode::NoError);
        msg.add_answer(Record::from_rdata(
            Name::from_str("example.com.").unwrap(),
            300,
            RData::A(A::new(192, 0, 2, 1)),
        ));

        let outcome = validator.validate_response(
            &msg,
            &keyring_with_key("example.com."),
            &Name::from_str("example.com.").unwrap(),
            RecordType::A,
        );
        assert!(outcome.is_bogus());
    }

    #[test]
    fn unprovable_negative_is_bogus() {
        let validator = ResponseValidator::new();
        let mut msg = response("missing.example.com.", RecordType::A, ResponseCode::NXDomain);
        msg.add_name_server(Record::from_rdata(
            Name::from_str("example.com.").unwrap(),
            300,
            RData::SOA(hickory_proto::rr::rdata::SOA::new(
                Name::from_str("ns1.example.com.").unwrap(),
                Name::from_str("hostmaster.example.com.").unwrap(),
                1,
                7200,
                900,
                1_209_600,
                300,
            )),
        ));

        let outcome = validator.validate_response(
            &msg,
            &keyring_with_key("example.com."),
            &Name::from_str("missing.example.com.").unwrap(),
            RecordType::A,
        );
        assert!(outcome.is_bogus());
    }

    #[test]
    fn signer_names_are_deduplicated() {
        let msg = response("example.com.", RecordType::A, ResponseCode::NoError);
        assert!(signer_names(&msg).is_empty());
    }

    #[test]
    fn dnskey_rrset_requires_parseable_keys() {
        let validator = ResponseValidator::new();
        let zone = Name::from_str("example.com.").unwrap();
        // Not a DNSKEY record at all.
        let record = Record::from_rdata(zone.clone(), 3600, RData::A(A::new(192, 0, 2, 1)));

        let ds = DsRecord {
            key_tag: 1,
            algorithm: 13,
            digest_type: 2,
            digest: vec![0u8; 32],
        };
        assert!(validator
            .validate_dnskey_rrset(&zone, &[record], &[ds])
            .is_err());
    }
}
