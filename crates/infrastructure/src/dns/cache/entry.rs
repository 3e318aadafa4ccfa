use super::record::CachedRecord;
use dashmap::DashMap;
use hickory_proto::rr::RecordType;
use rustc_hash::FxBuildHasher;
use std::sync::Arc;
use std::time::Instant;

/// Key of a per-type record set inside a cache entry.
///
/// An NS set cached from an *answer* section (the zone's own, authoritative
/// NS RRset) is stored under `ChildNs` so it can never be confused with a
/// parent-side referral NS set stored under `Regular(NS)`. Reads reconcile
/// `ChildNs` back to plain NS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetKey {
    Regular(RecordType),
    ChildNs,
}

impl SetKey {
    pub fn record_type(&self) -> RecordType {
        match self {
            SetKey::Regular(rt) => *rt,
            SetKey::ChildNs => RecordType::NS,
        }
    }
}

/// An RRset: ordered records sharing owner and type. Either entirely
/// ordinary or entirely one special record; never mixed.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    pub records: Vec<Arc<CachedRecord>>,
}

impl RecordSet {
    pub fn new(records: Vec<Arc<CachedRecord>>) -> Self {
        Self { records }
    }

    pub fn single(record: CachedRecord) -> Self {
        Self {
            records: vec![Arc::new(record)],
        }
    }

    pub fn first(&self) -> Option<&Arc<CachedRecord>> {
        self.records.first()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_special(&self) -> bool {
        self.first().map_or(false, |r| r.is_special())
    }

    fn any_stale(&self, now: Instant) -> bool {
        self.records.iter().any(|r| r.is_stale(now))
    }

    /// A set is unusable when any member is past its horizon: the TTL
    /// horizon on normal reads, the serve-stale horizon when the caller is
    /// serving stale because resolution is failing.
    fn any_unusable(&self, now: Instant, serve_stale: bool) -> bool {
        if serve_stale {
            self.records.iter().any(|r| r.is_stale(now))
        } else {
            self.records.iter().any(|r| r.is_expired(now))
        }
    }
}

/// All record sets cached under one owner name.
///
/// The per-key slot replacement in the inner map is the only atomicity the
/// store relies on: concurrent writers to different types never contend,
/// and for the same type the last writer wins.
#[derive(Debug, Default)]
pub struct CacheEntry {
    sets: DashMap<SetKey, Arc<RecordSet>, FxBuildHasher>,
}

impl CacheEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn set_count(&self) -> usize {
        self.sets.len()
    }

    /// Store a record set, applying the special-record overwrite policy:
    /// a failure-shaped set (Failure/Bad) never replaces live, non-special
    /// data, and when it replaces another failure-shaped set it inherits
    /// that set's accumulated extended-error options.
    ///
    /// Returns false when the write was suppressed.
    pub fn store_set(&self, key: SetKey, mut set: RecordSet, now: Instant) -> bool {
        if set.is_empty() {
            return false;
        }

        match self.sets.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let old = occupied.get().clone();
                if set.is_special() && set.first().map_or(false, |r| r.data().is_failure_like()) {
                    if !old.is_special() && !old.any_stale(now) {
                        return false;
                    }
                    if let Some(old_head) = old.first() {
                        if old_head.data().is_failure_like() {
                            inherit_extended_errors(&mut set, old_head);
                        }
                    }
                }
                occupied.insert(Arc::new(set));
                true
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(set));
                true
            }
        }
    }

    fn get_valid(&self, key: SetKey, now: Instant, serve_stale: bool) -> Option<Arc<RecordSet>> {
        let set = self.sets.get(&key)?.clone();
        if set.any_unusable(now, serve_stale) {
            // Any dead member voids the whole set.
            return None;
        }
        Some(set)
    }

    /// Point query with the per-type fallback rules:
    /// - DS/SOA/DNSKEY: exact type first, CNAME only if absent (CNAME can
    ///   coexist at a zone apex in broken setups);
    /// - ANY: union of all usable, non-special sets except DS;
    /// - everything else: CNAME first, then the exact type.
    ///
    /// A returned set is validated (no dead member) and A/AAAA sets with
    /// more than one record are shuffled on every read.
    pub fn query_records(
        &self,
        rtype: RecordType,
        skip_special: bool,
        serve_stale: bool,
        now: Instant,
    ) -> Option<RecordSet> {
        let found = match rtype {
            RecordType::DS | RecordType::SOA | RecordType::DNSKEY => self
                .get_valid(SetKey::Regular(rtype), now, serve_stale)
                .or_else(|| self.get_valid(SetKey::Regular(RecordType::CNAME), now, serve_stale)),
            RecordType::ANY => {
                let mut union = Vec::new();
                for item in self.sets.iter() {
                    if item.key().record_type() == RecordType::DS {
                        continue;
                    }
                    let set = item.value();
                    if set.is_special() || set.any_unusable(now, serve_stale) {
                        continue;
                    }
                    union.extend(set.records.iter().cloned());
                }
                if union.is_empty() {
                    None
                } else {
                    return Some(RecordSet::new(union));
                }
            }
            RecordType::NS => self
                .get_valid(SetKey::ChildNs, now, serve_stale)
                .or_else(|| self.get_valid(SetKey::Regular(RecordType::NS), now, serve_stale)),
            _ => self
                .get_valid(SetKey::Regular(RecordType::CNAME), now, serve_stale)
                .or_else(|| self.get_valid(SetKey::Regular(rtype), now, serve_stale)),
        };

        let found = found?;
        if skip_special && found.is_special() {
            return None;
        }

        Some(prepare_for_read(&found, rtype))
    }

    /// The NS set usable as a delegation for this owner: the validated
    /// child-side set when present, the parent-side referral set otherwise.
    pub fn delegation_set(&self, now: Instant) -> Option<Arc<RecordSet>> {
        let set = self
            .get_valid(SetKey::ChildNs, now, false)
            .or_else(|| self.get_valid(SetKey::Regular(RecordType::NS), now, false))?;
        if set.is_special() {
            return None;
        }
        Some(set)
    }

    /// Drop every set whose head record is stale. Returns removed count.
    pub fn remove_stale_sets(&self, now: Instant) -> usize {
        let stale_keys: Vec<SetKey> = self
            .sets
            .iter()
            .filter(|item| item.value().first().map_or(true, |r| r.is_stale(now)))
            .map(|item| *item.key())
            .collect();

        let mut removed = 0;
        for key in stale_keys {
            if self
                .sets
                .remove_if(&key, |_, set| set.first().map_or(true, |r| r.is_stale(now)))
                .is_some()
            {
                removed += 1;
            }
        }
        removed
    }
}

fn inherit_extended_errors(set: &mut RecordSet, old_head: &Arc<CachedRecord>) {
    let Some(old_stored) = old_head.data().stored() else {
        return;
    };
    if old_stored.extended_errors.is_empty() {
        return;
    }
    if let Some(head) = set.records.first_mut() {
        let head = Arc::make_mut(head);
        if let Some(stored) = head.data_mut().stored_mut() {
            let mut inherited = old_stored.extended_errors.clone();
            inherited.extend(stored.extended_errors.drain(..));
            stored.extended_errors = inherited;
        }
    }
}

/// Shuffle address sets on the way out for load distribution.
fn prepare_for_read(set: &RecordSet, rtype: RecordType) -> RecordSet {
    let mut records = set.records.clone();
    if records.len() > 1 && matches!(rtype, RecordType::A | RecordType::AAAA) {
        fastrand::shuffle(&mut records);
    }
    RecordSet::new(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::cache::record::{CachedData, ExtendedDnsError, StoredResponse};
    use hickory_proto::op::ResponseCode;
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{Name, RData, Record};
    use std::str::FromStr;

    fn cached_a(name: &str, ttl: u32, last_octet: u8, serve_stale: u32, now: Instant) -> CachedRecord {
        let record = Record::from_rdata(
            Name::from_str(name).unwrap(),
            ttl,
            RData::A(A::new(192, 0, 2, last_octet)),
        );
        let mut cached = CachedRecord::ordinary(record);
        cached.set_expiry(serve_stale, now);
        cached
    }

    fn failure_record(name: &str, ttl: u32, ede: Vec<ExtendedDnsError>, now: Instant) -> CachedRecord {
        let stored = StoredResponse {
            rcode: ResponseCode::ServFail,
            answers: vec![],
            authorities: vec![],
            additionals: vec![],
            answers_plain: vec![],
            authorities_plain: vec![],
            extended_errors: ede,
        };
        let mut cached = CachedRecord::special(
            Name::from_str(name).unwrap(),
            RecordType::A,
            ttl,
            CachedData::Failure(Box::new(stored)),
        );
        cached.set_expiry(0, now);
        cached
    }

    #[test]
    fn failure_never_replaces_useful_data() {
        let now = Instant::now();
        let entry = CacheEntry::new();
        let useful = RecordSet::single(cached_a("example.com.", 300, 1, 0, now));
        assert!(entry.store_set(SetKey::Regular(RecordType::A), useful, now));

        let failure = RecordSet::single(failure_record("example.com.", 10, vec![], now));
        assert!(!entry.store_set(SetKey::Regular(RecordType::A), failure, now));

        // The useful set is unchanged.
        let read = entry.query_records(RecordType::A, false, false, now).unwrap();
        assert!(!read.is_special());
        assert_eq!(read.len(), 1);
    }

    #[test]
    fn failure_over_failure_inherits_extended_errors() {
        let now = Instant::now();
        let entry = CacheEntry::new();
        let first = RecordSet::single(failure_record(
            "example.com.",
            10,
            vec![ExtendedDnsError {
                info_code: 22,
                extra_text: "no reachable authority".into(),
            }],
            now,
        ));
        assert!(entry.store_set(SetKey::Regular(RecordType::A), first, now));

        let second = RecordSet::single(failure_record(
            "example.com.",
            10,
            vec![ExtendedDnsError {
                info_code: 23,
                extra_text: "network error".into(),
            }],
            now,
        ));
        assert!(entry.store_set(SetKey::Regular(RecordType::A), second, now));

        let read = entry.query_records(RecordType::A, false, false, now).unwrap();
        let stored = read.first().unwrap().data().stored().unwrap();
        assert_eq!(stored.extended_errors.len(), 2);
        assert_eq!(stored.extended_errors[0].info_code, 22);
        assert_eq!(stored.extended_errors[1].info_code, 23);
    }

    #[test]
    fn stale_member_voids_whole_set() {
        let now = Instant::now();
        let entry = CacheEntry::new();
        let fresh = cached_a("example.com.", 300, 1, 0, now);
        // Already stale: zero TTL and no serve-stale window.
        let stale = cached_a("example.com.", 0, 2, 0, now - std::time::Duration::from_secs(1));
        let set = RecordSet::new(vec![Arc::new(fresh), Arc::new(stale)]);
        entry.store_set(SetKey::Regular(RecordType::A), set, now);

        assert!(entry.query_records(RecordType::A, false, false, now).is_none());
    }

    #[test]
    fn any_unions_types_except_ds() {
        let now = Instant::now();
        let entry = CacheEntry::new();
        entry.store_set(
            SetKey::Regular(RecordType::A),
            RecordSet::single(cached_a("example.com.", 300, 1, 0, now)),
            now,
        );

        let txt = Record::from_rdata(
            Name::from_str("example.com.").unwrap(),
            300,
            RData::TXT(hickory_proto::rr::rdata::TXT::new(vec!["v=spf1".to_string()])),
        );
        let mut txt_cached = CachedRecord::ordinary(txt);
        txt_cached.set_expiry(0, now);
        entry.store_set(SetKey::Regular(RecordType::TXT), RecordSet::single(txt_cached), now);

        let ds_like = cached_a("example.com.", 300, 3, 0, now);
        entry.store_set(SetKey::Regular(RecordType::DS), RecordSet::single(ds_like), now);

        let union = entry.query_records(RecordType::ANY, false, false, now).unwrap();
        assert_eq!(union.len(), 2);
    }

    #[test]
    fn skip_special_hides_special_sets() {
        let now = Instant::now();
        let entry = CacheEntry::new();
        entry.store_set(
            SetKey::Regular(RecordType::A),
            RecordSet::single(failure_record("example.com.", 10, vec![], now)),
            now,
        );

        assert!(entry.query_records(RecordType::A, true, false, now).is_none());
        assert!(entry.query_records(RecordType::A, false, false, now).is_some());
    }

    #[test]
    fn child_ns_reconciled_on_ns_read() {
        let now = Instant::now();
        let entry = CacheEntry::new();
        let ns = Record::from_rdata(
            Name::from_str("example.com.").unwrap(),
            3600,
            RData::NS(hickory_proto::rr::rdata::NS(
                Name::from_str("ns1.example.com.").unwrap(),
            )),
        );
        let mut cached = CachedRecord::ordinary(ns);
        cached.set_expiry(0, now);
        entry.store_set(SetKey::ChildNs, RecordSet::single(cached), now);

        let read = entry.query_records(RecordType::NS, false, false, now).unwrap();
        assert_eq!(read.first().unwrap().record_type(), RecordType::NS);
    }

    #[test]
    fn remove_stale_sets_by_head_record() {
        let now = Instant::now();
        let entry = CacheEntry::new();
        entry.store_set(
            SetKey::Regular(RecordType::A),
            RecordSet::single(cached_a("example.com.", 300, 1, 0, now)),
            now,
        );
        let old = now - std::time::Duration::from_secs(10);
        entry.store_set(
            SetKey::Regular(RecordType::TXT),
            RecordSet::single(cached_a("example.com.", 0, 2, 0, old)),
            now,
        );

        assert_eq!(entry.remove_stale_sets(now), 1);
        assert_eq!(entry.set_count(), 1);
    }
}
