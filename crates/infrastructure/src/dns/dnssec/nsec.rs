//! NSEC/NSEC3 denial-of-existence proofs for negative responses.
//!
//! A NODATA or NXDOMAIN answer is only trusted once the authority section
//! proves it: an NSEC/NSEC3 matching the name with the type absent from
//! the bitmap (NODATA), or records covering the name, its next-closer name
//! and the wildcard of its closest encloser (NXDOMAIN). Signature checking
//! of the proof records themselves happens in the response validator; this
//! module only reasons about coverage.

use super::types::{name_to_canonical_wire, Nsec3Record, NsecRecord};
use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::{Name, Record, RecordType};
use sha1::{Digest, Sha1};
use std::cmp::Ordering;

/// Canonical DNS name ordering (RFC 4034 §6.1): compare labels right to
/// left, case-insensitively, byte-wise.
pub fn canonical_cmp(a: &Name, b: &Name) -> Ordering {
    let a_labels: Vec<&[u8]> = a.iter().collect();
    let b_labels: Vec<&[u8]> = b.iter().collect();

    for (la, lb) in a_labels.iter().rev().zip(b_labels.iter().rev()) {
        let la: Vec<u8> = la.iter().map(u8::to_ascii_lowercase).collect();
        let lb: Vec<u8> = lb.iter().map(u8::to_ascii_lowercase).collect();
        match la.cmp(&lb) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a_labels.len().cmp(&b_labels.len())
}

/// True when `name` falls strictly between `owner` and `next` in canonical
/// order, honoring the wrap-around at the zone apex.
fn nsec_covers(owner: &Name, next: &Name, name: &Name) -> bool {
    match canonical_cmp(owner, next) {
        Ordering::Less => {
            canonical_cmp(owner, name) == Ordering::Less
                && canonical_cmp(name, next) == Ordering::Less
        }
        // Last NSEC in the zone: next wraps to the apex.
        _ => {
            canonical_cmp(owner, name) == Ordering::Less
                || canonical_cmp(name, next) == Ordering::Less
        }
    }
}

/// NSEC3 hash (algorithm 1 = SHA-1): IH(k) iterated over name || salt.
pub fn nsec3_hash(name: &Name, salt: &[u8], iterations: u16) -> Vec<u8> {
    let mut hash = {
        let mut hasher = Sha1::new();
        hasher.update(name_to_canonical_wire(name));
        hasher.update(salt);
        hasher.finalize().to_vec()
    };
    for _ in 0..iterations {
        let mut hasher = Sha1::new();
        hasher.update(&hash);
        hasher.update(salt);
        hash = hasher.finalize().to_vec();
    }
    hash
}

/// Base32hex (RFC 4648 §7) without padding, as used for NSEC3 owner labels.
pub fn base32hex_encode(data: &[u8]) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuv";
    let mut out = String::with_capacity(data.len() * 8 / 5 + 1);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;

    for &byte in data {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((buffer >> bits) & 0x1F) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(ALPHABET[((buffer << (5 - bits)) & 0x1F) as usize] as char);
    }
    out
}

struct NsecView<'a> {
    owner: Name,
    rdata: NsecRecord,
    _record: &'a Record,
}

struct Nsec3View<'a> {
    /// First label of the owner: the base32hex hash.
    hash_label: String,
    /// Zone the NSEC3 belongs to (owner minus the hash label).
    zone: Name,
    rdata: Nsec3Record,
    _record: &'a Record,
}

fn nsec_views(records: &[Record]) -> Vec<NsecView<'_>> {
    records
        .iter()
        .filter_map(|r| {
            NsecRecord::from_record(r).map(|rdata| NsecView {
                owner: r.name().to_lowercase(),
                rdata,
                _record: r,
            })
        })
        .collect()
}

fn nsec3_views(records: &[Record]) -> Vec<Nsec3View<'_>> {
    records
        .iter()
        .filter_map(|r| {
            let rdata = Nsec3Record::from_record(r)?;
            let owner = r.name().to_lowercase();
            let hash_label =
                String::from_utf8_lossy(owner.iter().next()?).to_ascii_lowercase();
            Some(Nsec3View {
                hash_label,
                zone: owner.base_name(),
                rdata,
                _record: r,
            })
        })
        .collect()
}

/// Validate the denial proof of a negative response. `true` means the
/// NXDOMAIN/NODATA is cryptographically backed (given the proof records
/// themselves verify), `false` means the negative answer is unprovable and
/// must be treated as bogus.
pub fn verify_negative_proof(response: &Message, qname: &Name, qtype: RecordType) -> bool {
    let authority: Vec<Record> = response.name_servers().to_vec();
    let qname = qname.to_lowercase();
    let nxdomain = response.response_code() == ResponseCode::NXDomain;

    let nsecs = nsec_views(&authority);
    if !nsecs.is_empty() {
        return if nxdomain {
            verify_nsec_nxdomain(&nsecs, &qname)
        } else {
            verify_nsec_nodata(&nsecs, &qname, qtype)
        };
    }

    let nsec3s = nsec3_views(&authority);
    if !nsec3s.is_empty() {
        return if nxdomain {
            verify_nsec3_nxdomain(&nsec3s, &qname)
        } else {
            verify_nsec3_nodata(&nsec3s, &qname, qtype)
        };
    }

    false
}

fn verify_nsec_nodata(nsecs: &[NsecView<'_>], qname: &Name, qtype: RecordType) -> bool {
    nsecs.iter().any(|view| {
        view.owner == *qname
            && !view.rdata.types.contains(&qtype)
            && !view.rdata.types.contains(&RecordType::CNAME)
    })
}

fn verify_nsec_nxdomain(nsecs: &[NsecView<'_>], qname: &Name) -> bool {
    let covered = nsecs
        .iter()
        .any(|view| nsec_covers(&view.owner, &view.rdata.next_domain, qname));
    if !covered {
        return false;
    }

    // Wildcard denial: some NSEC must cover (or match with an empty
    // bitmap for the type) the wildcard at the closest provable encloser.
    let mut encloser = qname.base_name();
    loop {
        let wildcard = match Name::from_str_relaxed("*").and_then(|w| w.append_domain(&encloser)) {
            Ok(w) => w,
            Err(_) => return false,
        };
        let denied = nsecs.iter().any(|view| {
            nsec_covers(&view.owner, &view.rdata.next_domain, &wildcard) || view.owner == wildcard
        });
        if denied {
            return true;
        }
        if encloser.is_root() {
            return false;
        }
        encloser = encloser.base_name();
    }
}

fn nsec3_matching<'a, 'b>(
    nsec3s: &'a [Nsec3View<'b>],
    name: &Name,
) -> Option<&'a Nsec3View<'b>> {
    nsec3s.iter().find(|view| {
        let hash = nsec3_hash(name, &view.rdata.salt, view.rdata.iterations);
        base32hex_encode(&hash) == view.hash_label
    })
}

fn nsec3_covering<'a, 'b>(
    nsec3s: &'a [Nsec3View<'b>],
    name: &Name,
) -> Option<&'a Nsec3View<'b>> {
    nsec3s.iter().find(|view| {
        let hash = nsec3_hash(name, &view.rdata.salt, view.rdata.iterations);
        let owner = view.hash_label.as_bytes();
        let target = base32hex_encode(&hash);
        let target = target.as_bytes();
        let next = base32hex_encode(&view.rdata.next_hashed);
        let next = next.as_bytes();
        if owner < next {
            owner < target && target < next
        } else {
            owner < target || target < next
        }
    })
}

fn verify_nsec3_nodata(nsec3s: &[Nsec3View<'_>], qname: &Name, qtype: RecordType) -> bool {
    match nsec3_matching(nsec3s, qname) {
        Some(view) => {
            !view.rdata.types.contains(&qtype) && !view.rdata.types.contains(&RecordType::CNAME)
        }
        // Opt-out ranges leave unsigned delegations unprovable; accept a
        // covering NSEC3 with the opt-out flag for DS queries.
        None => match nsec3_covering(nsec3s, qname) {
            Some(view) => qtype == RecordType::DS && view.rdata.flags & 0x01 != 0,
            None => false,
        },
    }
}

fn verify_nsec3_nxdomain(nsec3s: &[Nsec3View<'_>], qname: &Name) -> bool {
    // Closest-encloser proof (RFC 5155 §8.4): walk up until a matching
    // NSEC3 is found, then the next-closer name and the wildcard at the
    // encloser must both be covered.
    let mut encloser = qname.clone();
    let mut next_closer = qname.clone();

    while nsec3_matching(nsec3s, &encloser).is_none() {
        if encloser.is_root() {
            return false;
        }
        next_closer = encloser.clone();
        encloser = encloser.base_name();
    }

    if nsec3_covering(nsec3s, &next_closer).is_none() {
        return false;
    }

    let wildcard = match Name::from_str_relaxed("*").and_then(|w| w.append_domain(&encloser)) {
        Ok(w) => w,
        Err(_) => return false,
    };
    let opt_out = nsec3s.iter().any(|v| v.rdata.flags & 0x01 != 0);
    nsec3_covering(nsec3s, &wildcard).is_some() || opt_out
}
