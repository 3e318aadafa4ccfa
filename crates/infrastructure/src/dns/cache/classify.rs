//! Response classification: turns a whole DNS response message into the
//! record sets the store should absorb.
//!
//! The decision order mirrors the ingest contract: reject non-responses,
//! stamp expiry on everything, short-circuit bad-DNSSEC / blocked / error
//! responses into special records, then walk the answer section per
//! question (following CNAME chains) and classify the authority section
//! into negative cache, referral, or NODATA.

use super::entry::{RecordSet, SetKey};
use super::expiry::TtlPolicy;
use super::record::{rdata_wire, CachedData, CachedRecord, StoredResponse};
use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use rustc_hash::FxHashMap;
use std::time::Instant;
use tracing::{debug, trace};

/// Upper bound on CNAME links followed inside one response.
const MAX_CNAME_HOPS: usize = 16;

/// One pending write against the store.
#[derive(Debug)]
pub struct CacheWrite {
    pub owner: Name,
    pub key: SetKey,
    pub set: RecordSet,
}

/// Classify a response into cache writes. Returns an empty list for
/// messages that must not be cached (queries, truncated responses,
/// responses without a question).
pub fn classify(
    response: &Message,
    is_bad_dnssec_cache: bool,
    zone_cut: Option<&Name>,
    policy: &TtlPolicy,
    now: Instant,
) -> Vec<CacheWrite> {
    if response.message_type() != MessageType::Response
        || response.truncated()
        || response.queries().is_empty()
    {
        return Vec::new();
    }

    if is_bad_dnssec_cache {
        return special_per_question(response, policy, now, |stored| {
            CachedData::Bad(Box::new(stored))
        });
    }

    if is_policy_blocked(response) {
        let ttl = min_answer_ttl(response)
            .map(|t| policy.clamp(t))
            .unwrap_or(policy.negative_ttl);
        return special_with_ttl(response, ttl, 0, now, |stored| {
            CachedData::Blocked(Box::new(stored))
        });
    }

    match response.response_code() {
        ResponseCode::NoError | ResponseCode::NXDomain | ResponseCode::YXDomain => {}
        rcode => {
            trace!(?rcode, "Caching response as failure record");
            return special_per_question(response, policy, now, |stored| {
                CachedData::Failure(Box::new(stored))
            });
        }
    }

    classify_sections(response, zone_cut, policy, now)
}

fn special_per_question(
    response: &Message,
    policy: &TtlPolicy,
    now: Instant,
    make: impl Fn(StoredResponse) -> CachedData,
) -> Vec<CacheWrite> {
    special_with_ttl(response, policy.failure_ttl, 0, now, make)
}

fn special_with_ttl(
    response: &Message,
    ttl: u32,
    serve_stale: u32,
    now: Instant,
    make: impl Fn(StoredResponse) -> CachedData,
) -> Vec<CacheWrite> {
    response
        .queries()
        .iter()
        .map(|q| {
            let stored = StoredResponse::from_message(response);
            let mut record = CachedRecord::special(
                q.name().clone(),
                q.query_type(),
                ttl,
                make(stored),
            );
            record.set_expiry(serve_stale, now);
            CacheWrite {
                owner: q.name().clone(),
                key: SetKey::Regular(q.query_type()),
                set: RecordSet::single(record),
            }
        })
        .collect()
}

/// Policy engines in front of this cache blank out answers rather than
/// dropping them: a NoError answer whose addresses are all-zeros marks a
/// blocked response.
fn is_policy_blocked(response: &Message) -> bool {
    let mut saw_address = false;
    for record in response.answers() {
        match record.data() {
            RData::A(a) => {
                saw_address = true;
                if !a.0.is_unspecified() {
                    return false;
                }
            }
            RData::AAAA(aaaa) => {
                saw_address = true;
                if !aaaa.0.is_unspecified() {
                    return false;
                }
            }
            _ => {}
        }
    }
    saw_address
}

fn min_answer_ttl(response: &Message) -> Option<u32> {
    response
        .answers()
        .iter()
        .filter(|r| r.record_type() != RecordType::OPT)
        .map(Record::ttl)
        .min()
}

/// Key for grouping records: lowercased owner + type.
fn group_key(record: &Record) -> (Name, RecordType) {
    (record.name().to_lowercase(), record.record_type())
}

/// RRSIG metadata pulled out of the rdata wire form: the covered type and
/// the labels count (used to recognize wildcard expansions).
fn rrsig_info(record: &Record) -> Option<(RecordType, u8)> {
    if record.record_type() != RecordType::RRSIG {
        return None;
    }
    let wire = rdata_wire(record)?;
    if wire.len() < 4 {
        return None;
    }
    let covered = RecordType::from(u16::from_be_bytes([wire[0], wire[1]]));
    Some((covered, wire[3]))
}

/// Index of RRSIGs by (owner, covered type) across all sections.
fn rrsig_index(response: &Message) -> FxHashMap<(Name, RecordType), Vec<Record>> {
    let mut index: FxHashMap<(Name, RecordType), Vec<Record>> = FxHashMap::default();
    for record in response
        .answers()
        .iter()
        .chain(response.name_servers())
        .chain(response.additionals())
    {
        if let Some((covered, _)) = rrsig_info(record) {
            index
                .entry((record.name().to_lowercase(), covered))
                .or_default()
                .push(record.clone());
        }
    }
    index
}

/// Name a record points at for glue purposes, if its type carries one.
fn glue_target(record: &Record) -> Option<Name> {
    match record.data() {
        RData::NS(ns) => Some(ns.0.to_lowercase()),
        RData::MX(mx) => Some(mx.exchange().to_lowercase()),
        RData::SRV(srv) => Some(srv.target().to_lowercase()),
        RData::SVCB(svcb) => Some(svcb.target_name().to_lowercase()),
        RData::HTTPS(https) => Some(https.0.target_name().to_lowercase()),
        _ => None,
    }
}

fn is_loopback_glue(record: &Record) -> bool {
    match record.data() {
        RData::A(a) => a.0.is_loopback(),
        RData::AAAA(aaaa) => aaaa.0.is_loopback(),
        _ => false,
    }
}

/// Glue for a target name from the additional section: addresses and
/// service-binding hints, loopback addresses discarded.
fn collect_glue(response: &Message, target: &Name) -> Vec<Record> {
    response
        .additionals()
        .iter()
        .filter(|r| {
            matches!(
                r.record_type(),
                RecordType::A | RecordType::AAAA | RecordType::SVCB | RecordType::HTTPS
            )
        })
        .filter(|r| r.name().to_lowercase() == *target)
        .filter(|r| !is_loopback_glue(r))
        .cloned()
        .collect()
}

struct SectionClassifier<'a> {
    response: &'a Message,
    policy: &'a TtlPolicy,
    now: Instant,
    rrsigs: FxHashMap<(Name, RecordType), Vec<Record>>,
    wildcard_proofs: Vec<Record>,
    writes: Vec<CacheWrite>,
}

fn classify_sections(
    response: &Message,
    zone_cut: Option<&Name>,
    policy: &TtlPolicy,
    now: Instant,
) -> Vec<CacheWrite> {
    let wildcard_proofs: Vec<Record> = response
        .name_servers()
        .iter()
        .filter(|r| matches!(r.record_type(), RecordType::NSEC | RecordType::NSEC3))
        .cloned()
        .collect();

    let mut classifier = SectionClassifier {
        response,
        policy,
        now,
        rrsigs: rrsig_index(response),
        wildcard_proofs,
        writes: Vec::new(),
    };

    for query in response.queries() {
        let final_name = classifier.walk_answer(query.name(), query.query_type());
        classifier.classify_authority(query.query_type(), &final_name, zone_cut);
    }

    classifier.writes
}

impl SectionClassifier<'_> {
    /// Build a cached record for one ordinary record, attaching covering
    /// RRSIGs, glue, and wildcard proofs from this same response.
    fn build_cached(&self, record: &Record) -> CachedRecord {
        let mut clamped = record.clone();
        clamped.set_ttl(self.policy.clamp(record.ttl()));
        let mut cached = CachedRecord::ordinary(clamped);

        let key = group_key(record);
        if let Some(sigs) = self.rrsigs.get(&key) {
            cached.derived.rrsigs = sigs.clone();
            // An RRSIG over fewer labels than its owner name signs a
            // wildcard expansion; keep the proving NSECs with the record.
            let owner_labels = record.name().num_labels();
            if sigs
                .iter()
                .filter_map(rrsig_info)
                .any(|(_, labels)| labels < owner_labels)
            {
                cached.derived.nsec_proofs = self.wildcard_proofs.clone();
            }
        }
        if let Some(target) = glue_target(record) {
            cached.derived.glue = collect_glue(self.response, &target);
        }

        cached
    }

    fn push_set(&mut self, owner: Name, key: SetKey, records: Vec<CachedRecord>) {
        if records.is_empty() {
            return;
        }
        let set = RecordSet::new(
            records
                .into_iter()
                .map(|mut r| {
                    r.set_expiry(self.policy.serve_stale_ttl, self.now);
                    std::sync::Arc::new(r)
                })
                .collect(),
        );
        self.writes.push(CacheWrite { owner, key, set });
    }

    /// Walk the answer section for one question, following the CNAME chain
    /// and selecting cacheable records per type. Returns the final owner
    /// name of the chain (where a negative answer would attach).
    fn walk_answer(&mut self, qname: &Name, qtype: RecordType) -> Name {
        let answers: Vec<Record> = self.response.answers().to_vec();
        let mut current = qname.to_lowercase();
        let mut hops = 0usize;

        loop {
            let here: Vec<&Record> = answers
                .iter()
                .filter(|r| r.name().to_lowercase() == current)
                .collect();
            if here.is_empty() {
                return current;
            }

            // DNAME redirections are cached at their own owner; the chain
            // itself is followed through the synthesized CNAME below.
            for record in here
                .iter()
                .filter(|r| r.record_type() == RecordType::Unknown(39)) // DNAME (RR type 39)
            {
                let cached = self.build_cached(record);
                self.push_set(
                    record.name().to_lowercase(),
                    SetKey::Regular(RecordType::DNAME),
                    vec![cached],
                );
            }

            let cname = here
                .iter()
                .find(|r| r.record_type() == RecordType::CNAME)
                .copied();

            if let (Some(cname_record), true) = (
                cname,
                qtype != RecordType::CNAME && qtype != RecordType::ANY,
            ) {
                let cached = self.build_cached(cname_record);
                self.push_set(
                    current.clone(),
                    SetKey::Regular(RecordType::CNAME),
                    vec![cached],
                );

                let RData::CNAME(target) = cname_record.data() else {
                    return current;
                };
                hops += 1;
                if hops > MAX_CNAME_HOPS {
                    debug!(owner = %current, "CNAME chain too long, truncating");
                    return current;
                }
                current = target.0.to_lowercase();
                continue;
            }

            // Terminal: select records of the queried type (all types for
            // ANY), rewriting answer NS to the child-NS marker.
            let mut by_type: FxHashMap<RecordType, Vec<CachedRecord>> = FxHashMap::default();
            for record in here {
                let rt = record.record_type();
                if rt == RecordType::OPT || rt == RecordType::RRSIG || rt == RecordType::DNAME {
                    continue;
                }
                if qtype != RecordType::ANY && rt != qtype {
                    continue;
                }
                by_type.entry(rt).or_default().push(self.build_cached(record));
            }

            for (rt, records) in by_type {
                let key = if rt == RecordType::NS {
                    SetKey::ChildNs
                } else {
                    SetKey::Regular(rt)
                };
                self.push_set(current.clone(), key, records);
            }
            return current;
        }
    }

    /// Classify the authority section once the answer walk is done:
    /// SOA-only means negative cache, NS-only means referral (bailiwick
    /// checked against the supplied zone cut), nothing at all means NODATA.
    fn classify_authority(&mut self, qtype: RecordType, final_name: &Name, zone_cut: Option<&Name>) {
        let has_final_answer = self
            .response
            .answers()
            .iter()
            .any(|r| r.name().to_lowercase() == *final_name && r.record_type() == qtype)
            || (qtype == RecordType::ANY && !self.response.answers().is_empty());
        if has_final_answer {
            return;
        }

        let soa: Vec<&Record> = self
            .response
            .name_servers()
            .iter()
            .filter(|r| r.record_type() == RecordType::SOA)
            .collect();
        let ns: Vec<&Record> = self
            .response
            .name_servers()
            .iter()
            .filter(|r| r.record_type() == RecordType::NS)
            .collect();

        if !soa.is_empty() {
            // NODATA or NXDOMAIN: negative cache with
            // TTL = min(SOA minimum, SOA TTL).
            let soa_record = soa[0];
            let minimum = match soa_record.data() {
                RData::SOA(soa_data) => soa_data.minimum(),
                _ => self.policy.negative_ttl,
            };
            let ttl = self.policy.clamp(minimum.min(soa_record.ttl()));
            self.push_negative(final_name.clone(), qtype, ttl);
        } else if !ns.is_empty() {
            self.push_referral(&ns, zone_cut, final_name);
        } else {
            // Empty all around: cache as NODATA so the upstream is not
            // hammered for a name it refuses to describe.
            self.push_negative(final_name.clone(), qtype, self.policy.negative_ttl);
        }
    }

    fn push_negative(&mut self, owner: Name, qtype: RecordType, ttl: u32) {
        let stored = StoredResponse::from_message(self.response);
        let mut record = CachedRecord::special(
            owner.clone(),
            qtype,
            ttl,
            CachedData::Negative(Box::new(stored)),
        );
        record.set_expiry(self.policy.serve_stale_ttl, self.now);
        self.writes.push(CacheWrite {
            owner,
            key: SetKey::Regular(qtype),
            set: RecordSet::single(record),
        });
    }

    /// A referral is cached only when its owner sits inside the zone cut
    /// the response was solicited for and encloses the queried name;
    /// anything else smells like poisoning and is silently dropped.
    fn push_referral(&mut self, ns: &[&Record], zone_cut: Option<&Name>, final_name: &Name) {
        let owner = ns[0].name().to_lowercase();

        if !ns
            .iter()
            .all(|r| r.name().to_lowercase() == owner)
        {
            debug!(owner = %owner, "Referral with mixed NS owners dropped");
            return;
        }
        if !owner.zone_of(final_name) {
            debug!(
                owner = %owner,
                qname = %final_name,
                "Referral does not enclose the queried name, dropped"
            );
            return;
        }
        if let Some(cut) = zone_cut {
            let cut = cut.to_lowercase();
            if !cut.zone_of(&owner) {
                debug!(
                    owner = %owner,
                    zone_cut = %cut,
                    "Out-of-bailiwick referral dropped"
                );
                return;
            }
        }

        let records: Vec<CachedRecord> = ns.iter().map(|r| self.build_cached(r)).collect();
        self.push_set(owner.clone(), SetKey::Regular(RecordType::NS), records);

        // A signed referral carries the child's DS set (plus proofs);
        // cache it so the chain of trust can be extended without another
        // round trip.
        let ds: Vec<CachedRecord> = self
            .response
            .name_servers()
            .iter()
            .filter(|r| r.record_type() == RecordType::DS && r.name().to_lowercase() == owner)
            .map(|r| self.build_cached(r))
            .collect();
        self.push_set(owner, SetKey::Regular(RecordType::DS), ds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{Message, OpCode, Query};
    use hickory_proto::rr::rdata::{A, CNAME, NS, SOA};
    use std::str::FromStr;

    fn response_for(qname: &str, qtype: RecordType) -> Message {
        let mut message = Message::new(0x1234, MessageType::Response, OpCode::Query);
        let mut query = Query::new();
        query.set_name(Name::from_str(qname).unwrap());
        query.set_query_type(qtype);
        query.set_query_class(hickory_proto::rr::DNSClass::IN);
        message.add_query(query);
        message.set_response_code(ResponseCode::NoError);
        message
    }

    fn a_record(name: &str, ttl: u32, last: u8) -> Record {
        Record::from_rdata(
            Name::from_str(name).unwrap(),
            ttl,
            RData::A(A::new(192, 0, 2, last)),
        )
    }

    #[test]
    fn plain_answer_is_cached_at_owner() {
        let mut response = response_for("example.com.", RecordType::A);
        response.add_answer(a_record("example.com.", 300, 1));
        response.add_answer(a_record("example.com.", 300, 2));

        let writes = classify(&response, false, None, &TtlPolicy::default(), Instant::now());
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].key, SetKey::Regular(RecordType::A));
        assert_eq!(writes[0].set.len(), 2);
        assert!(!writes[0].set.is_special());
    }

    #[test]
    fn cname_chain_is_followed_and_cached() {
        let mut response = response_for("www.example.com.", RecordType::A);
        response.add_answer(Record::from_rdata(
            Name::from_str("www.example.com.").unwrap(),
            300,
            RData::CNAME(CNAME(Name::from_str("host.example.net.").unwrap())),
        ));
        response.add_answer(a_record("host.example.net.", 300, 1));

        let writes = classify(&response, false, None, &TtlPolicy::default(), Instant::now());
        let keys: Vec<_> = writes.iter().map(|w| (w.owner.to_ascii(), w.key)).collect();
        assert!(keys.contains(&(
            "www.example.com.".to_string(),
            SetKey::Regular(RecordType::CNAME)
        )));
        assert!(keys.contains(&("host.example.net.".to_string(), SetKey::Regular(RecordType::A))));
    }

    #[test]
    fn answer_ns_is_rewritten_to_child_ns() {
        let mut response = response_for("example.com.", RecordType::NS);
        response.add_answer(Record::from_rdata(
            Name::from_str("example.com.").unwrap(),
            3600,
            RData::NS(NS(Name::from_str("ns1.example.com.").unwrap())),
        ));

        let writes = classify(&response, false, None, &TtlPolicy::default(), Instant::now());
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].key, SetKey::ChildNs);
    }

    #[test]
    fn nxdomain_with_soa_becomes_negative_record() {
        let mut response = response_for("missing.example.com.", RecordType::A);
        response.set_response_code(ResponseCode::NXDomain);
        response.add_name_server(Record::from_rdata(
            Name::from_str("example.com.").unwrap(),
            3600,
            RData::SOA(SOA::new(
                Name::from_str("ns1.example.com.").unwrap(),
                Name::from_str("hostmaster.example.com.").unwrap(),
                2024010101,
                7200,
                900,
                1_209_600,
                120,
            )),
        ));

        let policy = TtlPolicy::default();
        let writes = classify(&response, false, None, &policy, Instant::now());
        assert_eq!(writes.len(), 1);
        let head = writes[0].set.first().unwrap();
        assert!(head.is_special());
        // TTL = min(SOA minimum 120, SOA TTL 3600).
        assert_eq!(head.ttl(), 120);
    }

    #[test]
    fn out_of_bailiwick_referral_is_dropped() {
        let mut response = response_for("www.example.com.", RecordType::A);
        response.add_name_server(Record::from_rdata(
            Name::from_str("example.org.").unwrap(),
            3600,
            RData::NS(NS(Name::from_str("ns1.example.org.").unwrap())),
        ));

        let zone_cut = Name::from_str("com.").unwrap();
        let writes = classify(
            &response,
            false,
            Some(&zone_cut),
            &TtlPolicy::default(),
            Instant::now(),
        );
        assert!(writes.is_empty());
    }

    #[test]
    fn in_bailiwick_referral_is_cached_with_glue() {
        let mut response = response_for("www.example.com.", RecordType::A);
        response.add_name_server(Record::from_rdata(
            Name::from_str("example.com.").unwrap(),
            172800,
            RData::NS(NS(Name::from_str("ns1.example.com.").unwrap())),
        ));
        response.add_additional(a_record("ns1.example.com.", 172800, 53));

        let zone_cut = Name::from_str("com.").unwrap();
        let writes = classify(
            &response,
            false,
            Some(&zone_cut),
            &TtlPolicy::default(),
            Instant::now(),
        );
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].key, SetKey::Regular(RecordType::NS));
        let head = writes[0].set.first().unwrap();
        assert_eq!(head.derived.glue.len(), 1);
    }

    #[test]
    fn loopback_glue_is_discarded() {
        let mut response = response_for("www.example.com.", RecordType::A);
        response.add_name_server(Record::from_rdata(
            Name::from_str("example.com.").unwrap(),
            172800,
            RData::NS(NS(Name::from_str("ns1.example.com.").unwrap())),
        ));
        response.add_additional(Record::from_rdata(
            Name::from_str("ns1.example.com.").unwrap(),
            172800,
            RData::A(A::new(127, 0, 0, 1)),
        ));

        let writes = classify(&response, false, None, &TtlPolicy::default(), Instant::now());
        let head = writes[0].set.first().unwrap();
        assert!(head.derived.glue.is_empty());
    }

    #[test]
    fn servfail_becomes_failure_record() {
        let mut response = response_for("example.com.", RecordType::A);
        response.set_response_code(ResponseCode::ServFail);

        let policy = TtlPolicy::default();
        let writes = classify(&response, false, None, &policy, Instant::now());
        assert_eq!(writes.len(), 1);
        let head = writes[0].set.first().unwrap();
        assert!(head.data().is_failure_like());
        assert_eq!(head.ttl(), policy.failure_ttl);
    }

    #[test]
    fn blocked_response_is_detected_by_null_addresses() {
        let mut response = response_for("ads.example.com.", RecordType::A);
        response.add_answer(Record::from_rdata(
            Name::from_str("ads.example.com.").unwrap(),
            60,
            RData::A(A::new(0, 0, 0, 0)),
        ));

        let writes = classify(&response, false, None, &TtlPolicy::default(), Instant::now());
        assert_eq!(writes.len(), 1);
        use crate::dns::cache::record::SpecialKind;
        assert_eq!(
            writes[0].set.first().unwrap().data().special_kind(),
            Some(SpecialKind::Blocked)
        );
    }

    #[test]
    fn truncated_response_is_rejected() {
        let mut response = response_for("example.com.", RecordType::A);
        response.set_truncated(true);
        response.add_answer(a_record("example.com.", 300, 1));

        let writes = classify(&response, false, None, &TtlPolicy::default(), Instant::now());
        assert!(writes.is_empty());
    }

    #[test]
    fn bad_dnssec_flag_wins_over_content() {
        let mut response = response_for("example.com.", RecordType::A);
        response.add_answer(a_record("example.com.", 300, 1));

        let writes = classify(&response, true, None, &TtlPolicy::default(), Instant::now());
        assert_eq!(writes.len(), 1);
        use crate::dns::cache::record::SpecialKind;
        assert_eq!(
            writes[0].set.first().unwrap().data().special_kind(),
            Some(SpecialKind::Bad)
        );
    }
}
