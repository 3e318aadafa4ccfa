//! The resolver engine: iterative resolution over an explicit frame stack.
//!
//! One logical resolution is a loop over a stack of [`ResolveFrame`]s.
//! Dependent lookups (a name server's own address, the DS set of a zone
//! cut) push frames instead of recursing natively, so the depth bound is
//! explicit and testable. Every resolution step consults the cache first
//! and feeds every response back into it.

use super::fanout::resolve_fanout;
use super::frame::{FramePurpose, FrameStack, ResolveFrame};
use super::query::{build_query, exchange, randomize_name_case};
use super::sanitize::sanitize_response;
use crate::dns::cache::RecordCache;
use crate::dns::dnssec::validator::signer_names;
use crate::dns::dnssec::{DnssecStatus, DsRecord, KeyRing, ResponseValidator, TrustAnchorStore};
use crate::dns::nameserver::NameServerAddress;
use crate::dns::record_type_map::RecordTypeMapper;
use crate::dns::root_hints::RootHints;
use async_trait::async_trait;
use boreal_dns_application::{DnsResolution, DnsResolver};
use boreal_dns_domain::{DnsConfig, DnsQuery, DomainError};
use bytes::Bytes;
use hickory_proto::op::{Message, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};

/// Bound on CNAME chains chased within one frame.
const MAX_CNAME_HOPS: u32 = 8;

/// Resolver counters for logging and diagnostics.
#[derive(Debug, Default)]
pub struct ResolverMetrics {
    pub queries_total: AtomicU64,
    pub queries_success: AtomicU64,
    pub queries_failed: AtomicU64,
    pub cache_hits: AtomicU64,
    pub dnssec_validations: AtomicU64,
    pub dnssec_failures: AtomicU64,
}

/// What a response means for the frame that solicited it.
enum Interpretation {
    /// Final answer (positive or negative) for the frame's question.
    Answer,
    /// The answer ends in a CNAME whose target the frame must chase.
    ChaseCname(Name),
    /// Referral to a deeper zone; servers are extracted from the response
    /// by the caller.
    Delegation {
        zone: Name,
        ds_records: Vec<DsRecord>,
        insecure_proven: bool,
    },
    /// Minimized walk: expose one more label to the same server.
    MinimizeDeeper,
    /// Minimization-intolerant server: re-query with the full question.
    DisableMinimization,
    /// This server cannot help; advance the cursor.
    NextServer,
}

/// Recursive-capable resolver over the shared record cache.
pub struct RecursiveResolver {
    config: DnsConfig,
    cache: Arc<RecordCache>,
    trust_anchors: TrustAnchorStore,
    validator: ResponseValidator,
    root_hints: RootHints,
    forwarders: Vec<Arc<NameServerAddress>>,
    metrics: Arc<ResolverMetrics>,
}

impl RecursiveResolver {
    pub fn new(
        config: DnsConfig,
        cache: Arc<RecordCache>,
        trust_anchors: TrustAnchorStore,
        root_hints: RootHints,
    ) -> Result<Self, DomainError> {
        let forwarders = config
            .forwarders
            .iter()
            .map(|s| NameServerAddress::parse(s).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()
            .map_err(DomainError::ConfigurationError)?;

        Ok(Self {
            config,
            cache,
            trust_anchors,
            validator: ResponseValidator::new(),
            root_hints,
            forwarders,
            metrics: Arc::new(ResolverMetrics::default()),
        })
    }

    pub fn metrics(&self) -> Arc<ResolverMetrics> {
        Arc::clone(&self.metrics)
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    /// Resolve a request message to a response message.
    #[instrument(skip_all, fields(qname = %request.queries().first().map(|q| q.name().to_ascii()).unwrap_or_default()))]
    pub async fn resolve_message(&self, request: &Message) -> Result<Message, DomainError> {
        let (mut response, _status) = self.resolve_with_status(request).await?;
        let mut header = *response.header();
        header.set_id(request.id());
        response.set_header(header);
        Ok(response)
    }

    /// Resolve a request and report the DNSSEC status of the answer.
    pub async fn resolve_with_status(
        &self,
        request: &Message,
    ) -> Result<(Message, DnssecStatus), DomainError> {
        let question = request
            .queries()
            .first()
            .cloned()
            .ok_or_else(|| DomainError::InvalidDomainName("request carries no question".into()))?;

        self.metrics.queries_total.fetch_add(1, Ordering::Relaxed);

        if let Some(cached) = self.cache.query(request, false, false) {
            self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
            self.metrics.queries_success.fetch_add(1, Ordering::Relaxed);
            let status = if self.config.dnssec_validation {
                DnssecStatus::Unknown
            } else {
                DnssecStatus::Disabled
            };
            return Ok((cached, status));
        }

        let result = if self.forwarders.is_empty() {
            self.resolve_recursive(question.clone()).await
        } else {
            self.resolve_forwarded(question.clone()).await
        };

        match result {
            Ok(outcome) => {
                self.metrics.queries_success.fetch_add(1, Ordering::Relaxed);
                Ok(outcome)
            }
            Err(e) => {
                // Resolution is failing: serve stale data if we still have
                // any inside its window.
                if let Some(stale) = self.cache.query(request, true, false) {
                    warn!(qname = %question.name(), "Serving stale answer, upstream failing");
                    self.metrics.queries_success.fetch_add(1, Ordering::Relaxed);
                    return Ok((stale, DnssecStatus::Indeterminate));
                }
                self.metrics.queries_failed.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Forwarding mode: race the configured servers.
    async fn resolve_forwarded(
        &self,
        question: Query,
    ) -> Result<(Message, DnssecStatus), DomainError> {
        let dnssec = self.config.dnssec_validation;
        let request = build_query(question.clone(), true, dnssec, true);

        let response = match resolve_fanout(
            &self.forwarders,
            &request,
            self.timeout(),
            self.config.retries,
            self.config.concurrency,
        )
        .await
        {
            Ok(response) => response,
            Err(e) => {
                self.cache.cache_server_failure(&request);
                return Err(e);
            }
        };

        let mut status = if dnssec {
            DnssecStatus::Indeterminate
        } else {
            DnssecStatus::Disabled
        };

        if dnssec {
            if let Some(addr) = self.forwarders.iter().find_map(|s| s.socket_addr()) {
                let root_ds = Arc::new(self.trust_anchors.root_ds_set());
                let keyring = self
                    .build_keyring(&response, addr, Name::root(), root_ds)
                    .await?;
                let outcome = self.validator.validate_response(
                    &response,
                    &keyring,
                    question.name(),
                    question.query_type(),
                );
                self.metrics.dnssec_validations.fetch_add(1, Ordering::Relaxed);
                if outcome.is_bogus() {
                    self.metrics.dnssec_failures.fetch_add(1, Ordering::Relaxed);
                    self.cache.cache_response(&response, true, None);
                    return Err(self.dnssec_error(&question, outcome.reason, &response));
                }
                status = outcome.status;
            }
        }

        self.cache.cache_response(&response, false, None);
        Ok((response, status))
    }

    fn dnssec_error(
        &self,
        question: &Query,
        reason: Option<String>,
        response: &Message,
    ) -> DomainError {
        DomainError::DnssecValidationFailed {
            domain: question.name().to_ascii(),
            reason: reason.unwrap_or_else(|| "validation failed".to_string()),
            response: response.to_vec().ok(),
        }
    }

    /// Iterative resolution from the root over the explicit frame stack.
    async fn resolve_recursive(
        &self,
        question: Query,
    ) -> Result<(Message, DnssecStatus), DomainError> {
        let dnssec = self.config.dnssec_validation;
        let original_request = build_query(question.clone(), true, dnssec, false);

        let mut stack = FrameStack::new(self.config.max_stack_depth);
        let mut bottom = ResolveFrame::new(question.clone(), FramePurpose::Question, dnssec);
        if dnssec {
            bottom.last_ds = Some(Arc::new(self.trust_anchors.root_ds_set()));
        }
        stack
            .push(bottom)
            .map_err(|e| self.fail_hard(&original_request, e))?;

        loop {
            // ---- Candidate servers for the top frame.
            let needs_servers = stack.top().map_or(false, |f| f.name_servers.is_empty());
            if needs_servers {
                let frame = stack.top().expect("stack non-empty");
                let cache_request = build_query(frame.question.clone(), true, frame.dnssec_ok, false);
                match self.cache.query(&cache_request, false, true) {
                    Some(response) if is_referral(&response) => {
                        let zone = referral_zone(&response).unwrap_or_else(Name::root);
                        let mut servers = referral_servers(
                            &response,
                            self.config.prefer_ipv6,
                            self.config.delegation_port,
                        );

                        // A cache-sourced referral whose glue has expired can
                        // loop back into a zone we are already resolving.
                        let ancestors = stack.ancestor_server_domains();
                        let looped = servers.iter().any(|s| {
                            s.needs_resolution()
                                && s.domain()
                                    .map_or(false, |d| ancestors.contains(&d.to_lowercase()))
                        });
                        if looped {
                            debug!(zone = %zone, "Cached referral loops through an ancestor frame, discarded");
                            servers = self.root_servers();
                            let frame = stack.top_mut().expect("stack non-empty");
                            frame.zone_cut = Some(Name::root());
                            frame.name_servers = servers;
                        } else {
                            let frame = stack.top_mut().expect("stack non-empty");
                            frame.zone_cut = Some(zone);
                            frame.name_servers = servers;
                        }
                        continue;
                    }
                    Some(response) => {
                        // The cache answered this frame's question outright.
                        self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
                        let frame = stack.pop().expect("stack non-empty");
                        match self.complete_frame(&mut stack, frame, response)? {
                            Some(outcome) => return Ok(outcome),
                            None => continue,
                        }
                    }
                    None => {
                        // Root entry is permanent, so this cannot happen in
                        // practice; treat as frame failure.
                        let frame = stack.top_mut().expect("stack non-empty");
                        frame.last_error = Some(DomainError::NoNameServers);
                        frame.server_index = frame.name_servers.len().max(1);
                    }
                }
            }

            // ---- All servers of the top frame exhausted?
            let exhausted = stack.top().map_or(false, |f| f.servers_exhausted());
            if exhausted {
                let failed = stack.pop().expect("stack non-empty");
                if stack.is_empty() {
                    self.cache.cache_server_failure(&original_request);
                    return Err(failed.last_error.unwrap_or_else(|| DomainError::ServerFailure {
                        domain: question.name().to_ascii(),
                        reason: "no name server answered".to_string(),
                    }));
                }
                let parent = stack.top_mut().expect("stack non-empty");
                parent.last_error = failed.last_error;
                parent.pending_delegation = None;
                // The server waiting on this dependency is presumed unable
                // to resolve it; move past it.
                parent.advance_server();
                continue;
            }

            // ---- Dependent lookup: the current server's own address.
            let frame = stack.top().expect("stack non-empty");
            let server = frame.current_server().expect("cursor in bounds").clone();
            if server.needs_resolution() && self.config.proxy.is_none() {
                let ns_domain = server.domain().expect("domain endpoint").clone();
                let queried_aaaa = self.config.prefer_ipv6;
                let child = self.address_frame(&ns_domain, queried_aaaa);
                if let Err(e) = stack.push(child) {
                    return Err(self.fail_hard(&original_request, e));
                }
                continue;
            }
            let Some(addr) = server.socket_addr() else {
                let frame = stack.top_mut().expect("stack non-empty");
                frame.advance_server();
                continue;
            };

            // ---- Build and send the (possibly minimized) query.
            let frame = stack.top().expect("stack non-empty");
            let (request, minimized) = self.build_network_request(frame);
            trace!(
                server = %addr,
                qname = %request.queries()[0].name(),
                qtype = %request.queries()[0].query_type(),
                minimized,
                depth = stack.len(),
                "Querying name server"
            );

            let mut response = match self.exchange_with_policy(addr, &request).await {
                Ok(response) => response,
                Err(e) => {
                    let frame = stack.top_mut().expect("stack non-empty");
                    frame.last_error = Some(e);
                    frame.advance_server();
                    continue;
                }
            };

            // ---- Sanitize before anything looks at the sections.
            let request_qname = request.queries()[0].name().to_lowercase();
            let frame = stack.top().expect("stack non-empty");
            sanitize_response(&mut response, &request_qname, frame.zone_cut.as_ref());

            // ---- DNSSEC validation before caching.
            let mut status = DnssecStatus::Disabled;
            if frame.dnssec_ok {
                let chain = frame.last_ds.clone();
                let ds_owner = frame.ds_owner.clone();
                match self
                    .validate_exchange(&request, &response, addr, chain, ds_owner)
                    .await
                {
                    Ok(outcome_status) => status = outcome_status,
                    Err(e) => {
                        let zone_cut = frame.zone_cut.clone();
                        self.cache.cache_response(&response, true, zone_cut.as_ref());
                        let frame = stack.top_mut().expect("stack non-empty");
                        frame.last_error = Some(e);
                        frame.advance_server();
                        continue;
                    }
                }
            }

            // ---- Absorb into the cache.
            self.cache
                .cache_response(&response, false, frame.zone_cut.as_ref());

            // ---- Interpret.
            let frame = stack.top_mut().expect("stack non-empty");
            match interpret_response(&response, frame, minimized, self.config.max_minimization_hops)
            {
                Interpretation::Answer => {
                    let mut frame = stack.pop().expect("stack non-empty");
                    frame.last_response = Some(response.clone());
                    let final_response = finalize_answer(&frame, response, status);
                    match self.complete_frame(&mut stack, frame, final_response)? {
                        Some((message, _)) => return Ok((message, status)),
                        None => continue,
                    }
                }
                Interpretation::ChaseCname(target) => {
                    frame.cname_hops += 1;
                    if frame.cname_hops > MAX_CNAME_HOPS {
                        frame.last_error = Some(DomainError::InvalidDnsResponse(
                            "CNAME chain too long".to_string(),
                        ));
                        frame.server_index = frame.name_servers.len();
                        continue;
                    }
                    trace!(target = %target, "Chasing CNAME");
                    frame
                        .accumulated_answers
                        .extend(response.answers().iter().cloned());
                    let mut next = frame.question.clone();
                    next.set_name(target);
                    frame.question = next;
                    frame.zone_cut = None;
                    frame.name_servers.clear();
                    frame.server_index = 0;
                    frame.hop_count = 0;
                    frame.minimization_disabled = false;
                    frame.minimized_extra_labels = 1;
                }
                Interpretation::Delegation {
                    zone,
                    ds_records,
                    insecure_proven,
                } => {
                    if frame.hop_count >= self.config.max_delegation_hops {
                        frame.last_error = Some(DomainError::ServerFailure {
                            domain: frame.question.name().to_ascii(),
                            reason: "delegation hop bound exceeded".to_string(),
                        });
                        frame.advance_server();
                        continue;
                    }
                    let mut servers = referral_servers(
                        &response,
                        self.config.prefer_ipv6,
                        self.config.delegation_port,
                    );
                    if servers.is_empty() {
                        frame.advance_server();
                        continue;
                    }
                    shuffle_servers(&mut servers);

                    if frame.dnssec_ok && chain_is_secure(&frame.last_ds) {
                        if !ds_records.is_empty() {
                            frame.last_ds = Some(Arc::new(ds_records));
                            frame.ds_owner = zone.clone();
                            frame.descend(zone, servers);
                        } else if insecure_proven {
                            // Provenly unsigned delegation: the chain ends
                            // here, everything below is Insecure.
                            frame.last_ds = Some(Arc::new(Vec::new()));
                            frame.ds_owner = zone.clone();
                            frame.descend(zone, servers);
                        } else {
                            // Chain of trust must extend top-down before we
                            // query deeper: fetch DS from the parent side.
                            frame.pending_delegation = Some((zone.clone(), servers));
                            let child = self.ds_frame(&zone, frame);
                            if let Err(e) = stack.push(child) {
                                return Err(self.fail_hard(&original_request, e));
                            }
                        }
                    } else {
                        frame.descend(zone, servers);
                    }
                }
                Interpretation::MinimizeDeeper => {
                    frame.minimization_hops += 1;
                    frame.minimized_extra_labels += 1;
                    if frame.minimization_hops > self.config.max_minimization_hops {
                        debug!("Minimization hop bound reached, disabling");
                        frame.minimization_disabled = true;
                    }
                }
                Interpretation::DisableMinimization => {
                    debug!(qname = %frame.question.name(), "Server intolerant of minimized queries");
                    frame.minimization_disabled = true;
                }
                Interpretation::NextServer => {
                    frame.advance_server();
                }
            }
        }
    }

    /// Pop-time bookkeeping: route a completed frame's answer to its
    /// parent, or — for the bottom frame — hand the final answer out.
    fn complete_frame(
        &self,
        stack: &mut FrameStack,
        frame: ResolveFrame,
        response: Message,
    ) -> Result<Option<(Message, DnssecStatus)>, DomainError> {
        if stack.is_empty() {
            if self.config.ns_revalidation {
                self.spawn_ns_revalidation(&frame);
            }
            return Ok(Some((response, DnssecStatus::Unknown)));
        }

        match &frame.purpose {
            FramePurpose::Question => {
                // Nested plain questions do not occur; treat like an
                // address lookup result with no consumer.
                let parent = stack.top_mut().expect("stack non-empty");
                parent.advance_server();
            }
            FramePurpose::NsAddress {
                ns_domain,
                queried_aaaa,
            } => {
                let ips = collect_addresses(&response, ns_domain);
                let parent = stack.top_mut().expect("stack non-empty");
                if ips.is_empty() {
                    if *queried_aaaa && !parent.address_fallback_done {
                        // The server may only have an IPv4 address.
                        parent.address_fallback_done = true;
                        let child = self.address_frame(ns_domain, false);
                        if stack.push(child).is_err() {
                            let parent = stack.top_mut().expect("stack non-empty");
                            parent.advance_server();
                        }
                    } else {
                        parent.address_fallback_done = false;
                        parent.advance_server();
                    }
                } else {
                    parent.address_fallback_done = false;
                    if let Some(server) = parent.current_server() {
                        server.set_resolved(ips[0]);
                    }
                    // Same server is retried now that it has an endpoint.
                }
            }
            FramePurpose::DsChain { zone } => {
                let ds_records: Vec<DsRecord> = response
                    .answers()
                    .iter()
                    .filter(|r| {
                        r.record_type() == RecordType::DS && r.name().to_lowercase() == *zone
                    })
                    .filter_map(DsRecord::from_record)
                    .collect();
                let parent = stack.top_mut().expect("stack non-empty");
                parent.last_ds = Some(Arc::new(ds_records));
                parent.ds_owner = zone.clone();
                if let Some((zone, servers)) = parent.pending_delegation.take() {
                    parent.descend(zone, servers);
                }
            }
        }

        Ok(None)
    }

    fn address_frame(&self, ns_domain: &Name, aaaa: bool) -> ResolveFrame {
        let mut query = Query::new();
        query.set_name(ns_domain.clone());
        query.set_query_type(if aaaa { RecordType::AAAA } else { RecordType::A });
        query.set_query_class(DNSClass::IN);

        let mut frame = ResolveFrame::new(
            query,
            FramePurpose::NsAddress {
                ns_domain: ns_domain.clone(),
                queried_aaaa: aaaa,
            },
            self.config.dnssec_validation,
        );
        if self.config.dnssec_validation {
            frame.last_ds = Some(Arc::new(self.trust_anchors.root_ds_set()));
        }
        frame
    }

    fn ds_frame(&self, zone: &Name, parent: &ResolveFrame) -> ResolveFrame {
        let mut query = Query::new();
        query.set_name(zone.clone());
        query.set_query_type(RecordType::DS);
        query.set_query_class(DNSClass::IN);

        let mut frame = ResolveFrame::new(
            query,
            FramePurpose::DsChain { zone: zone.clone() },
            parent.dnssec_ok,
        );
        // The DS set lives on the parent side of the cut: ask the servers
        // we are already talking to.
        frame.name_servers = parent.name_servers.clone();
        frame.zone_cut = parent.zone_cut.clone();
        frame.last_ds = parent.last_ds.clone();
        frame.ds_owner = parent.ds_owner.clone();
        frame
    }

    fn fail_hard(&self, original_request: &Message, error: DomainError) -> DomainError {
        warn!(error = %error, "Resolution aborted");
        self.cache.cache_server_failure(original_request);
        error
    }

    fn root_servers(&self) -> Vec<Arc<NameServerAddress>> {
        let port = self.config.delegation_port;
        let mut servers: Vec<Arc<NameServerAddress>> = self
            .root_hints
            .servers()
            .iter()
            .flat_map(|s| s.socket_addrs(self.config.prefer_ipv6))
            .map(|addr| Arc::new(NameServerAddress::from_ip(SocketAddr::new(addr.ip(), port))))
            .collect();
        shuffle_servers(&mut servers);
        servers
    }

    /// Build the network query for a frame, applying QNAME minimization
    /// and 0x20 name randomization. Returns the request plus whether the
    /// question was minimized.
    fn build_network_request(&self, frame: &ResolveFrame) -> (Message, bool) {
        let full_name = frame.question.name().clone();
        let full_type = frame.question.query_type();

        let (mut name, qtype, minimized) = match (&frame.zone_cut, self.config.qname_minimization) {
            (Some(cut), true) if !frame.minimization_disabled => {
                let expose = u32::from(cut.num_labels()) + u32::from(frame.minimized_extra_labels);
                if expose >= u32::from(full_name.num_labels()) {
                    (full_name.clone(), full_type, false)
                } else {
                    let minimized_name = full_name.trim_to(expose as usize);
                    if leftmost_label_is_underscored(&minimized_name) {
                        // Service labels break minimization walks on some
                        // authoritative servers; configured policy is to
                        // give up rather than probe them.
                        (full_name.clone(), full_type, false)
                    } else {
                        let qtype = match full_type {
                            RecordType::AAAA => RecordType::AAAA,
                            RecordType::DS => RecordType::DS,
                            _ => RecordType::A,
                        };
                        (minimized_name, qtype, true)
                    }
                }
            }
            _ => (full_name.clone(), full_type, false),
        };

        if self.config.randomize_name {
            name = randomize_name_case(&name);
        }

        let mut query = Query::new();
        query.set_name(name);
        query.set_query_type(qtype);
        query.set_query_class(DNSClass::IN);

        (build_query(query, true, frame.dnssec_ok, false), minimized)
    }

    /// Exchange with one server, retrying once without EDNS on timeout
    /// (ancient middleboxes drop OPT).
    async fn exchange_with_policy(
        &self,
        addr: SocketAddr,
        request: &Message,
    ) -> Result<Message, DomainError> {
        match exchange(addr, request, self.timeout()).await {
            Ok(response) => Ok(response),
            Err(e) if e.is_transport_error() && request.extensions().is_some() => {
                debug!(server = %addr, "Timeout with EDNS, retrying without");
                let mut plain = request.clone();
                *plain.extensions_mut() = None;
                exchange(addr, &plain, self.timeout()).await
            }
            Err(e) => Err(e),
        }
    }

    /// DNSSEC handling for one exchange: the responding server must
    /// advertise DNSSEC OK, then the chain-backed keyring is built and the
    /// whole response validated.
    async fn validate_exchange(
        &self,
        request: &Message,
        response: &Message,
        addr: SocketAddr,
        chain: Option<Arc<Vec<DsRecord>>>,
        ds_owner: Name,
    ) -> Result<DnssecStatus, DomainError> {
        let question = &request.queries()[0];

        let Some(chain) = chain else {
            return Ok(DnssecStatus::Indeterminate);
        };
        if chain.is_empty() {
            // Chain provenly ends above this zone.
            return Ok(DnssecStatus::Insecure);
        }

        let advertised = response
            .extensions()
            .as_ref()
            .map_or(false, |edns| edns.flags().dnssec_ok);
        if !advertised {
            return Err(self.dnssec_error(
                question,
                Some("server did not advertise DNSSEC OK".to_string()),
                response,
            ));
        }

        let keyring = self.build_keyring(response, addr, ds_owner, chain).await?;
        self.metrics.dnssec_validations.fetch_add(1, Ordering::Relaxed);
        let outcome =
            self.validator
                .validate_response(response, &keyring, question.name(), question.query_type());
        if outcome.is_bogus() {
            self.metrics.dnssec_failures.fetch_add(1, Ordering::Relaxed);
            return Err(self.dnssec_error(question, outcome.reason, response));
        }
        Ok(outcome.status)
    }

    /// Build the keyring for a response: for every RRSIG signer name at or
    /// below the trusted DS owner, validate its DNSKEY set against the DS
    /// chain, extending the chain label by label for sub-zone signers.
    async fn build_keyring(
        &self,
        response: &Message,
        addr: SocketAddr,
        ds_owner: Name,
        trusted_ds: Arc<Vec<DsRecord>>,
    ) -> Result<KeyRing, DomainError> {
        let mut keyring = KeyRing::new();
        let ds_owner = ds_owner.to_lowercase();

        for signer in signer_names(response) {
            if keyring.contains_zone(&signer) || !ds_owner.zone_of(&signer) {
                continue;
            }

            let mut current_zone = ds_owner.clone();
            let mut current_ds: Vec<DsRecord> = (*trusted_ds).clone();

            loop {
                if !keyring.contains_zone(&current_zone) {
                    let dnskeys = self
                        .fetch_rrset(addr, &current_zone, RecordType::DNSKEY)
                        .await?;
                    let keys = self
                        .validator
                        .validate_dnskey_rrset(&current_zone, &dnskeys, &current_ds)
                        .map_err(|reason| DomainError::DnssecValidationFailed {
                            domain: current_zone.to_ascii(),
                            reason,
                            response: response.to_vec().ok(),
                        })?;
                    keyring.insert(&current_zone, keys);
                }
                if current_zone == signer {
                    break;
                }

                let next = next_zone_toward(&current_zone, &signer);
                let ds_answers = self.fetch_rrset(addr, &next, RecordType::DS).await?;
                let parsed: Vec<DsRecord> =
                    ds_answers.iter().filter_map(DsRecord::from_record).collect();
                if parsed.is_empty() {
                    // Unsigned cut on the way down; the signer cannot be
                    // chained and its RRsets will not verify.
                    break;
                }
                current_ds = parsed;
                current_zone = next;
            }
        }

        Ok(keyring)
    }

    /// Fetch an RRset from the cache, else directly from the given server,
    /// absorbing the response into the cache.
    async fn fetch_rrset(
        &self,
        addr: SocketAddr,
        name: &Name,
        rtype: RecordType,
    ) -> Result<Vec<Record>, DomainError> {
        let mut query = Query::new();
        query.set_name(name.clone());
        query.set_query_type(rtype);
        query.set_query_class(DNSClass::IN);
        let request = build_query(query, true, true, false);

        let response = match self.cache.query(&request, false, false) {
            Some(cached) if !cached.answers().is_empty() => cached,
            _ => {
                let response = self.exchange_with_policy(addr, &request).await?;
                self.cache.cache_response(&response, false, None);
                response
            }
        };

        Ok(response
            .answers()
            .iter()
            .filter(|r| r.record_type() == rtype && r.name().to_lowercase() == name.to_lowercase())
            .cloned()
            .collect())
    }

    /// Fire-and-forget re-query of the parent-side NS sets seen during
    /// this resolution, against servers that already have resolved IPs.
    /// Detects stale or hijacked delegations without blocking the caller.
    fn spawn_ns_revalidation(&self, frame: &ResolveFrame) {
        let cuts: Vec<(Name, Vec<Arc<NameServerAddress>>)> = frame
            .visited_cuts
            .iter()
            .map(|(zone, servers)| {
                let usable: Vec<Arc<NameServerAddress>> = servers
                    .iter()
                    .filter(|s| s.socket_addr().is_some())
                    .cloned()
                    .collect();
                (zone.clone(), usable)
            })
            .filter(|(_, servers)| !servers.is_empty())
            .collect();
        if cuts.is_empty() {
            return;
        }

        let cache = Arc::clone(&self.cache);
        let timeout = self.timeout();
        tokio::spawn(async move {
            for (zone, servers) in cuts {
                let mut query = Query::new();
                query.set_name(zone.clone());
                query.set_query_type(RecordType::NS);
                query.set_query_class(DNSClass::IN);
                let request = build_query(query, true, false, false);

                for server in servers {
                    let Some(addr) = server.socket_addr() else {
                        continue;
                    };
                    match exchange(addr, &request, timeout).await {
                        Ok(response)
                            if response.response_code() == ResponseCode::NoError
                                && !response.answers().is_empty() =>
                        {
                            trace!(zone = %zone, "NS revalidation refreshed delegation");
                            cache.cache_response(&response, false, Some(&zone));
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            trace!(zone = %zone, error = %e, "NS revalidation query failed");
                        }
                    }
                }
            }
        });
    }
}

fn chain_is_secure(last_ds: &Option<Arc<Vec<DsRecord>>>) -> bool {
    last_ds.as_ref().map_or(false, |ds| !ds.is_empty())
}

/// Candidate server list from a referral's NS records plus glue: every
/// glued address becomes a direct endpoint; glue-less targets are domain
/// endpoints the resolver resolves on demand.
fn referral_servers(
    message: &Message,
    prefer_ipv6: bool,
    port: u16,
) -> Vec<Arc<NameServerAddress>> {
    let mut servers: Vec<Arc<NameServerAddress>> = Vec::new();

    for record in message.name_servers() {
        let RData::NS(ns) = record.data() else {
            continue;
        };
        let target = ns.0.to_lowercase();

        let mut glue: Vec<IpAddr> = Vec::new();
        for additional in message.additionals() {
            if additional.name().to_lowercase() != target {
                continue;
            }
            match additional.data() {
                RData::A(a) => glue.push(IpAddr::V4(a.0)),
                RData::AAAA(aaaa) => glue.push(IpAddr::V6(aaaa.0)),
                _ => {}
            }
        }

        if glue.is_empty() {
            servers.push(Arc::new(NameServerAddress::from_domain(target, port)));
        } else {
            if prefer_ipv6 {
                glue.sort_by_key(|ip| ip.is_ipv4());
            }
            for ip in glue {
                servers.push(Arc::new(NameServerAddress::from_ip(SocketAddr::new(ip, port))));
            }
        }
    }

    servers
}

fn leftmost_label_is_underscored(name: &Name) -> bool {
    name.iter().next().map_or(false, |l| l.starts_with(b"_"))
}

fn shuffle_servers(servers: &mut [Arc<NameServerAddress>]) {
    if servers.len() > 1 {
        fastrand::shuffle(servers);
    }
}

fn is_referral(message: &Message) -> bool {
    message.response_code() == ResponseCode::NoError
        && message.answers().is_empty()
        && message
            .name_servers()
            .iter()
            .any(|r| r.record_type() == RecordType::NS)
}

fn referral_zone(message: &Message) -> Option<Name> {
    message
        .name_servers()
        .iter()
        .find(|r| r.record_type() == RecordType::NS)
        .map(|r| r.name().to_lowercase())
}

/// Addresses from an NS-address lookup answer. The section was already
/// sanitized to the CNAME chain of the queried name, so every A/AAAA in it
/// belongs to the server.
fn collect_addresses(response: &Message, _owner: &Name) -> Vec<IpAddr> {
    response
        .answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(IpAddr::V4(a.0)),
            RData::AAAA(aaaa) => Some(IpAddr::V6(aaaa.0)),
            _ => None,
        })
        .collect()
}

/// One label deeper from `parent` toward `descendant`.
fn next_zone_toward(parent: &Name, descendant: &Name) -> Name {
    descendant.trim_to(usize::from(parent.num_labels()) + 1)
}

/// Decide what a (sanitized, validated) response means for its frame.
fn interpret_response(
    response: &Message,
    frame: &ResolveFrame,
    minimized: bool,
    max_minimization_hops: u32,
) -> Interpretation {
    match response.response_code() {
        ResponseCode::NoError | ResponseCode::NXDomain | ResponseCode::YXDomain => {}
        rcode => {
            debug!(?rcode, "Server answered with an error, trying next");
            return Interpretation::NextServer;
        }
    }

    let has_ns_authority = response
        .name_servers()
        .iter()
        .any(|r| r.record_type() == RecordType::NS);
    let has_soa_authority = response
        .name_servers()
        .iter()
        .any(|r| r.record_type() == RecordType::SOA);
    let is_delegation = response.answers().is_empty() && has_ns_authority && !has_soa_authority;

    if minimized && !is_delegation {
        // The minimized walk only ever terminates through a referral; any
        // other outcome (exists, NODATA, NXDOMAIN, wrong type) advances
        // the exposed name toward the full question on the same server.
        return if frame.minimization_hops >= max_minimization_hops {
            Interpretation::DisableMinimization
        } else {
            Interpretation::MinimizeDeeper
        };
    }

    if !response.answers().is_empty() {
        let qname = frame.question.name().to_lowercase();
        let qtype = frame.question.query_type();

        // Follow the (sanitized) chain to its terminal name.
        let mut current = qname;
        let mut hops = 0;
        loop {
            let here: Vec<&Record> = response
                .answers()
                .iter()
                .filter(|r| r.name().to_lowercase() == current)
                .collect();
            if here.is_empty() {
                // The chain dead-ends inside this response: chase it.
                return Interpretation::ChaseCname(current);
            }
            if qtype == RecordType::ANY
                || qtype == RecordType::CNAME
                || here.iter().any(|r| r.record_type() == qtype)
            {
                return Interpretation::Answer;
            }
            match here.iter().find_map(|r| match r.data() {
                RData::CNAME(c) => Some(c.0.to_lowercase()),
                _ => None,
            }) {
                Some(target) => {
                    hops += 1;
                    if hops > MAX_CNAME_HOPS {
                        return Interpretation::NextServer;
                    }
                    current = target;
                }
                None => return Interpretation::Answer,
            }
        }
    }

    if has_soa_authority {
        // NODATA / NXDOMAIN.
        return Interpretation::Answer;
    }

    if is_delegation {
        let Some(zone) = referral_zone(response) else {
            return Interpretation::NextServer;
        };
        let qname = frame.question.name().to_lowercase();
        if !zone.zone_of(&qname) {
            return Interpretation::NextServer;
        }
        if let Some(cut) = &frame.zone_cut {
            let cut = cut.to_lowercase();
            // A referral must descend, never sideways or up.
            if !(cut.zone_of(&zone) && zone != cut) {
                return Interpretation::NextServer;
            }
        }

        let ds_records: Vec<DsRecord> = response
            .name_servers()
            .iter()
            .filter(|r| r.record_type() == RecordType::DS && r.name().to_lowercase() == zone)
            .filter_map(DsRecord::from_record)
            .collect();
        let insecure_proven = response
            .name_servers()
            .iter()
            .any(|r| matches!(r.record_type(), RecordType::NSEC | RecordType::NSEC3));

        return Interpretation::Delegation {
            zone,
            ds_records,
            insecure_proven,
        };
    }

    // Nothing anywhere: misconfigured server.
    Interpretation::NextServer
}

/// Merge the frame's accumulated CNAME chain into the terminal response.
fn finalize_answer(frame: &ResolveFrame, mut response: Message, _status: DnssecStatus) -> Message {
    if frame.accumulated_answers.is_empty() {
        return response;
    }
    let tail = response.take_answers();
    let mut merged = frame.accumulated_answers.clone();
    merged.extend(tail);
    response.insert_answers(merged);
    response
}

#[async_trait]
impl DnsResolver for RecursiveResolver {
    async fn resolve(&self, query: &DnsQuery) -> Result<DnsResolution, DomainError> {
        let mut name = Name::from_str(&query.domain)
            .map_err(|e| DomainError::InvalidDomainName(format!("{}: {e}", query.domain)))?;
        name.set_fqdn(true);

        let mut question = Query::new();
        question.set_name(name);
        question.set_query_type(RecordTypeMapper::to_wire(query.record_type));
        question.set_query_class(DNSClass::IN);

        let request = build_query(question, true, self.config.dnssec_validation, true);
        let (response, status) = self.resolve_with_status(&request).await?;

        match response.response_code() {
            ResponseCode::NoError => {}
            ResponseCode::NXDomain => {
                return Err(DomainError::NameError(query.domain.to_string()));
            }
            rcode => {
                return Err(DomainError::ServerFailure {
                    domain: query.domain.to_string(),
                    reason: format!("rcode {rcode:?}"),
                });
            }
        }

        let mut addresses = Vec::new();
        let mut cname_chain: Vec<Arc<str>> = Vec::new();
        let mut min_ttl: Option<u32> = None;
        for record in response.answers() {
            min_ttl = Some(min_ttl.map_or(record.ttl(), |t| t.min(record.ttl())));
            match record.data() {
                RData::A(a) => addresses.push(IpAddr::V4(a.0)),
                RData::AAAA(aaaa) => addresses.push(IpAddr::V6(aaaa.0)),
                RData::CNAME(cname) => cname_chain.push(Arc::from(cname.0.to_utf8().as_str())),
                _ => {}
            }
        }

        let negative_soa_ttl = response.name_servers().iter().find_map(|r| match r.data() {
            RData::SOA(soa) => Some(soa.minimum().min(r.ttl())),
            _ => None,
        });

        Ok(DnsResolution {
            addresses: Arc::new(addresses),
            cache_hit: false,
            dnssec_status: Some(status.as_str()),
            cname_chain: Arc::from(cname_chain),
            min_ttl,
            negative_soa_ttl,
            wire_response: response.to_vec().ok().map(Bytes::from),
        })
    }
}
