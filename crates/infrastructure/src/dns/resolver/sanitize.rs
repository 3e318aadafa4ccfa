//! Response sanitization before caching or interpretation.
//!
//! A single compromised or misconfigured server must not be able to
//! pollute the cache: the answer section is truncated at the first record
//! whose owner falls outside the expected CNAME chain, and authority
//! records outside the current zone cut are dropped.

use hickory_proto::op::Message;
use hickory_proto::rr::{Name, RData, Record, RecordType};
use tracing::debug;

/// Sanitize a response in place against the question it answers and the
/// zone cut of the server that produced it.
pub fn sanitize_response(response: &mut Message, qname: &Name, zone_cut: Option<&Name>) {
    let answers = response.take_answers();
    let kept_answers = sanitize_answers(answers, qname);

    let authorities = response.take_name_servers();
    let kept_authorities = sanitize_authorities(authorities, zone_cut);

    response.insert_answers(kept_answers);
    response.insert_name_servers(kept_authorities);
}

/// Keep answer records only while they follow the CNAME chain from the
/// queried name; everything after the first out-of-chain owner goes.
fn sanitize_answers(answers: Vec<Record>, qname: &Name) -> Vec<Record> {
    let mut kept = Vec::with_capacity(answers.len());
    let mut expected: Vec<Name> = vec![qname.to_lowercase()];

    for record in answers {
        let owner = record.name().to_lowercase();
        let in_chain = expected.iter().any(|n| *n == owner)
            // DNAME applies to descendants of its owner.
            || (record.record_type() == RecordType::Unknown(39) // DNAME (RR type 39)
                && expected.iter().any(|n| owner.zone_of(n)));
        if !in_chain {
            debug!(owner = %owner, "Answer record outside the expected chain, truncating");
            break;
        }

        if let RData::CNAME(cname) = record.data() {
            let target = cname.0.to_lowercase();
            if !expected.contains(&target) {
                expected.push(target);
            }
        }
        kept.push(record);
    }

    kept
}

/// Authority records must sit at or below the zone cut the queried server
/// is responsible for; anything else is off-path data.
fn sanitize_authorities(authorities: Vec<Record>, zone_cut: Option<&Name>) -> Vec<Record> {
    let Some(cut) = zone_cut else {
        return authorities;
    };
    let cut = cut.to_lowercase();

    authorities
        .into_iter()
        .filter(|record| {
            let owner = record.name().to_lowercase();
            let keep = cut.zone_of(&owner);
            if !keep {
                debug!(
                    owner = %owner,
                    zone_cut = %cut,
                    "Authority record outside zone cut dropped"
                );
            }
            keep
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{MessageType, OpCode};
    use hickory_proto::rr::rdata::{A, CNAME, NS};
    use std::str::FromStr;

    fn a_record(name: &str, last: u8) -> Record {
        Record::from_rdata(
            Name::from_str(name).unwrap(),
            300,
            RData::A(A::new(192, 0, 2, last)),
        )
    }

    fn cname_record(name: &str, target: &str) -> Record {
        Record::from_rdata(
            Name::from_str(name).unwrap(),
            300,
            RData::CNAME(CNAME(Name::from_str(target).unwrap())),
        )
    }

    fn ns_record(name: &str, target: &str) -> Record {
        Record::from_rdata(
            Name::from_str(name).unwrap(),
            3600,
            RData::NS(NS(Name::from_str(target).unwrap())),
        )
    }

    #[test]
    fn unrelated_answer_records_are_truncated() {
        let mut response = Message::new(1, MessageType::Response, OpCode::Query);
        response.add_answer(a_record("example.com.", 1));
        response.add_answer(a_record("victim.example.org.", 66));

        let qname = Name::from_str("example.com.").unwrap();
        sanitize_response(&mut response, &qname, None);

        assert_eq!(response.answers().len(), 1);
        assert_eq!(response.answers()[0].name().to_ascii(), "example.com.");
    }

    #[test]
    fn cname_chain_extends_the_expected_set() {
        let mut response = Message::new(1, MessageType::Response, OpCode::Query);
        response.add_answer(cname_record("www.example.com.", "host.example.net."));
        response.add_answer(a_record("host.example.net.", 1));
        response.add_answer(a_record("unrelated.invalid.", 66));

        let qname = Name::from_str("www.example.com.").unwrap();
        sanitize_response(&mut response, &qname, None);

        assert_eq!(response.answers().len(), 2);
    }

    #[test]
    fn authority_outside_zone_cut_is_dropped() {
        let mut response = Message::new(1, MessageType::Response, OpCode::Query);
        response.add_name_server(ns_record("example.com.", "ns1.example.com."));
        response.add_name_server(ns_record("example.org.", "ns1.example.org."));

        let qname = Name::from_str("www.example.com.").unwrap();
        let cut = Name::from_str("com.").unwrap();
        sanitize_response(&mut response, &qname, Some(&cut));

        assert_eq!(response.name_servers().len(), 1);
        assert_eq!(response.name_servers()[0].name().to_ascii(), "example.com.");
    }

    #[test]
    fn no_zone_cut_keeps_authority_untouched() {
        let mut response = Message::new(1, MessageType::Response, OpCode::Query);
        response.add_name_server(ns_record("example.org.", "ns1.example.org."));

        let qname = Name::from_str("www.example.com.").unwrap();
        sanitize_response(&mut response, &qname, None);
        assert_eq!(response.name_servers().len(), 1);
    }
}
