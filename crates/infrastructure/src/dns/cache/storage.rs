use super::classify::{classify, CacheWrite};
use super::entry::{CacheEntry, RecordSet, SetKey};
use super::expiry::TtlPolicy;
use super::metrics::CacheMetrics;
use super::record::{CachedData, CachedRecord};
use crate::dns::root_hints::RootHints;
use boreal_dns_application::{CacheMetricsSnapshot, DnsCachePort};
use dashmap::DashMap;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use rustc_hash::FxBuildHasher;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace};

/// Bound on CNAME links chased across cache entries while assembling one
/// response.
const MAX_CHAIN_LOOKUPS: usize = 16;

/// The response cache: a concurrent map from lower-cased owner name to the
/// per-type record sets cached under that name.
///
/// Readers never block writers; replacing an RRset is a single map-slot
/// write. The root entry is seeded at construction from root hints and
/// never expires.
pub struct RecordCache {
    entries: DashMap<String, Arc<CacheEntry>, FxBuildHasher>,
    policy: TtlPolicy,
    root_hints: RootHints,
    metrics: CacheMetrics,
}

/// Canonical map key: lower-cased, fully-qualified ASCII form.
fn cache_key(name: &Name) -> String {
    let mut key = name.to_lowercase();
    key.set_fqdn(true);
    key.to_ascii()
}

fn request_dnssec_ok(request: &Message) -> bool {
    request
        .extensions()
        .as_ref()
        .map_or(false, |edns| edns.flags().dnssec_ok)
}

impl RecordCache {
    pub fn new(policy: TtlPolicy, root_hints: RootHints) -> Self {
        let cache = Self {
            entries: DashMap::with_hasher(FxBuildHasher::default()),
            policy,
            root_hints,
            metrics: CacheMetrics::default(),
        };
        cache.seed_root();
        info!(
            root_servers = cache.root_hints.servers().len(),
            "Record cache initialized"
        );
        cache
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Install the permanent synthetic root NS set with embedded glue.
    fn seed_root(&self) {
        let root = Name::root();
        let mut records = Vec::new();
        for server in self.root_hints.servers() {
            let ns = Record::from_rdata(
                root.clone(),
                self.root_hints.ttl(),
                RData::NS(hickory_proto::rr::rdata::NS(server.name.clone())),
            );
            let mut cached = CachedRecord::ordinary(ns);
            cached.derived.glue = server.glue_records(self.root_hints.ttl());
            cached.set_permanent();
            records.push(Arc::new(cached));
        }

        let entry = self
            .entries
            .entry(cache_key(&root))
            .or_insert_with(|| Arc::new(CacheEntry::new()));
        entry.store_set(
            SetKey::Regular(RecordType::NS),
            RecordSet::new(records),
            Instant::now(),
        );
    }

    /// Point query against the cache. Returns a complete response message
    /// (answer, negative, failure replay, or — when
    /// `find_closest_name_servers` is set — the deepest cached referral),
    /// or `None` on a miss.
    pub fn query(
        &self,
        request: &Message,
        serve_stale: bool,
        find_closest_name_servers: bool,
    ) -> Option<Message> {
        let now = Instant::now();
        let query = request.queries().first()?.clone();
        let dnssec_ok = request_dnssec_ok(request);
        let qtype = query.query_type();

        let mut answers: Vec<Record> = Vec::new();
        let mut current = query.name().to_lowercase();
        let mut lookups = 0usize;

        loop {
            let entry = match self.entries.get(&cache_key(&current)) {
                Some(e) => e.clone(),
                None => break,
            };
            // Serve-stale reads happen because resolution is failing;
            // replaying a cached failure record then would be pointless,
            // so special records are skipped on that path.
            let Some(set) = entry.query_records(qtype, serve_stale, serve_stale, now) else {
                break;
            };

            if set.is_special() {
                self.metrics.record_hit();
                let head = set.first()?;
                return Some(self.replay_special(request, &query, head, &answers, dnssec_ok, now));
            }

            let set_type = set.first()?.record_type();
            if set_type == RecordType::CNAME
                && qtype != RecordType::CNAME
                && qtype != RecordType::ANY
            {
                let mut target = None;
                for cached in &set.records {
                    if let Some(record) = cached.replay_record(now) {
                        if let RData::CNAME(cname) = record.data() {
                            target = Some(cname.0.to_lowercase());
                        }
                        if dnssec_ok {
                            answers.extend(cached.derived.rrsigs.iter().cloned());
                        }
                        answers.push(record);
                    }
                }
                let Some(target) = target else { break };
                lookups += 1;
                if lookups > MAX_CHAIN_LOOKUPS {
                    break;
                }
                current = target;
                continue;
            }

            for cached in &set.records {
                if let Some(record) = cached.replay_record(now) {
                    if dnssec_ok {
                        answers.extend(cached.derived.rrsigs.iter().cloned());
                    }
                    answers.push(record);
                }
            }
            self.metrics.record_hit();
            trace!(qname = %query.name(), %qtype, "Cache answer hit");
            return Some(self.build_answer(request, &query, answers));
        }

        if !answers.is_empty() {
            // The chain dead-ends inside the cache; hand back what we have
            // so the resolver can continue from the last target.
            self.metrics.record_hit();
            return Some(self.build_answer(request, &query, answers));
        }

        if find_closest_name_servers {
            if let Some(referral) = self.closest_referral(request, &query, now) {
                self.metrics.record_hit();
                return Some(referral);
            }
        }

        self.metrics.record_miss();
        None
    }

    /// Walk up the label tree for the deepest usable cached delegation.
    fn closest_referral(&self, request: &Message, query: &Query, now: Instant) -> Option<Message> {
        // DS must be answered by the parent zone; start the walk there.
        let mut current = if query.query_type() == RecordType::DS {
            query.name().base_name().to_lowercase()
        } else {
            query.name().to_lowercase()
        };

        loop {
            if let Some(entry) = self.entries.get(&cache_key(&current)) {
                if let Some(set) = entry.delegation_set(now) {
                    let mut response =
                        Message::new(request.id(), MessageType::Response, OpCode::Query);
                    response.add_query(query.clone());
                    response.set_response_code(ResponseCode::NoError);
                    response.set_recursion_available(true);

                    for cached in &set.records {
                        if let Some(record) = cached.replay_record(now) {
                            response.add_name_server(record);
                        }
                        for glue in &cached.derived.glue {
                            if matches!(
                                glue.record_type(),
                                RecordType::A | RecordType::AAAA
                            ) {
                                response.add_additional(glue.clone());
                            }
                        }
                    }
                    trace!(zone = %current, qname = %query.name(), "Cache referral");
                    return Some(response);
                }
            }
            if current.is_root() {
                return None;
            }
            current = current.base_name();
        }
    }

    fn build_answer(&self, request: &Message, query: &Query, answers: Vec<Record>) -> Message {
        let mut response = Message::new(request.id(), MessageType::Response, OpCode::Query);
        response.add_query(query.clone());
        response.set_response_code(ResponseCode::NoError);
        response.set_recursion_available(true);
        for record in answers {
            response.add_answer(record);
        }
        response
    }

    /// Replay a special record as a full response: the stored sections are
    /// reproduced verbatim, with the DNSSEC-stripped copies used for
    /// clients that did not set DNSSEC OK.
    fn replay_special(
        &self,
        request: &Message,
        query: &Query,
        head: &Arc<CachedRecord>,
        chain: &[Record],
        dnssec_ok: bool,
        now: Instant,
    ) -> Message {
        let mut response = Message::new(request.id(), MessageType::Response, OpCode::Query);
        response.add_query(query.clone());
        response.set_recursion_available(true);

        match head.data() {
            CachedData::Failure(_) | CachedData::Bad(_) => {
                response.set_response_code(ResponseCode::ServFail);
            }
            _ => match head.data().stored() {
                Some(stored) => {
                    response.set_response_code(stored.rcode);
                    let remaining = head.effective_ttl(now);
                    let (answers, authorities) = stored.sections(dnssec_ok);
                    for record in chain {
                        response.add_answer(record.clone());
                    }
                    for record in answers {
                        let mut record = record.clone();
                        record.set_ttl(record.ttl().min(remaining));
                        response.add_answer(record);
                    }
                    for record in authorities {
                        let mut record = record.clone();
                        record.set_ttl(record.ttl().min(remaining));
                        response.add_name_server(record);
                    }
                }
                None => {
                    response.set_response_code(ResponseCode::ServFail);
                }
            },
        }
        response
    }

    /// Absorb a whole response message, classifying every section.
    /// Idempotent per logical content; re-caching refreshes expiry.
    pub fn cache_response(
        &self,
        response: &Message,
        is_bad_dnssec_cache: bool,
        zone_cut: Option<&Name>,
    ) {
        let now = Instant::now();
        let writes = classify(response, is_bad_dnssec_cache, zone_cut, &self.policy, now);
        if writes.is_empty() {
            return;
        }

        let mut stored = 0usize;
        for CacheWrite { owner, key, set } in writes {
            let entry = self
                .entries
                .entry(cache_key(&owner))
                .or_insert_with(|| Arc::new(CacheEntry::new()))
                .clone();
            if entry.store_set(key, set, now) {
                stored += 1;
            } else {
                self.metrics
                    .special_writes_suppressed
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
        self.metrics
            .insertions
            .fetch_add(stored as u64, Ordering::Relaxed);
        debug!(sets = stored, "Response cached");
    }

    /// Synthesize and store a ServerFailure placeholder for a question the
    /// resolver could not answer.
    pub fn cache_server_failure(&self, request: &Message) {
        let mut failure = Message::new(request.id(), MessageType::Response, OpCode::Query);
        for query in request.queries() {
            failure.add_query(query.clone());
        }
        failure.set_response_code(ResponseCode::ServFail);
        self.cache_response(&failure, false, None);
    }

    /// Full sweep: drop record sets whose head record is stale, then drop
    /// entries left empty. Runs on an external timer.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0usize;

        for item in self.entries.iter() {
            removed += item.value().remove_stale_sets(now);
        }
        self.entries
            .retain(|key, entry| !entry.is_empty() || key == &cache_key(&Name::root()));

        if removed > 0 {
            self.metrics
                .swept_records
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, entries = self.entries.len(), "Cache sweep completed");
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.seed_root();
        info!("Cache flushed");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl DnsCachePort for RecordCache {
    fn cache_size(&self) -> usize {
        self.len()
    }

    fn cache_metrics_snapshot(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot(self.len())
    }

    fn remove_expired_records(&self) -> usize {
        self.sweep()
    }

    fn flush(&self) {
        self.clear();
    }
}
