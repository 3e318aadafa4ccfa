use crate::dns::dnssec::DsRecord;
use crate::dns::nameserver::NameServerAddress;
use boreal_dns_domain::DomainError;
use hickory_proto::op::{Message, Query};
use hickory_proto::rr::Name;
use std::sync::Arc;

/// Why a frame was pushed, deciding how its result is applied to the
/// parent when it pops.
#[derive(Debug, Clone)]
pub enum FramePurpose {
    /// The caller's question (only ever the bottom frame).
    Question,
    /// Resolve a name server's own address so the parent can query it.
    NsAddress { ns_domain: Name, queried_aaaa: bool },
    /// Extend the chain of trust: fetch the DS set for a zone cut before
    /// descending into it.
    DsChain { zone: Name },
}

/// One step of the iterative resolution: a question plus everything needed
/// to resume it after a dependent lookup completes.
#[derive(Debug)]
pub struct ResolveFrame {
    pub question: Query,
    pub purpose: FramePurpose,

    /// Innermost zone known to be authoritative for the question; `None`
    /// until the first referral lands (or when minimization is off).
    pub zone_cut: Option<Name>,

    /// DNSSEC OK flag carried on outgoing queries from this frame.
    pub dnssec_ok: bool,

    /// Last validated DS set and its owner zone. `Some(empty)` means the
    /// chain was proven insecure at `ds_owner`.
    pub last_ds: Option<Arc<Vec<DsRecord>>>,
    pub ds_owner: Name,

    /// Candidate name servers and the cursor into them.
    pub name_servers: Vec<Arc<NameServerAddress>>,
    pub server_index: usize,

    /// Delegations followed within this frame.
    pub hop_count: u32,

    /// QNAME minimization state: extra labels currently exposed past the
    /// zone cut, hops taken, and whether minimization gave up.
    pub minimized_extra_labels: u8,
    pub minimization_hops: u32,
    pub minimization_disabled: bool,

    /// CNAME chase state within this frame.
    pub cname_hops: u32,
    pub accumulated_answers: Vec<hickory_proto::rr::Record>,

    /// AAAA→A fallback bookkeeping for NS-address frames.
    pub address_fallback_done: bool,

    /// A delegation waiting for its DS set: the descent is applied once
    /// the DS subframe pops.
    pub pending_delegation: Option<(Name, Vec<Arc<NameServerAddress>>)>,

    /// Zone-cut transitions seen while descending, kept for background NS
    /// revalidation.
    pub visited_cuts: Vec<(Name, Vec<Arc<NameServerAddress>>)>,

    pub last_response: Option<Message>,
    pub last_error: Option<DomainError>,
}

impl ResolveFrame {
    pub fn new(question: Query, purpose: FramePurpose, dnssec_ok: bool) -> Self {
        Self {
            question,
            purpose,
            zone_cut: None,
            dnssec_ok,
            last_ds: None,
            ds_owner: Name::root(),
            name_servers: Vec::new(),
            server_index: 0,
            hop_count: 0,
            minimized_extra_labels: 1,
            minimization_hops: 0,
            minimization_disabled: false,
            cname_hops: 0,
            accumulated_answers: Vec::new(),
            address_fallback_done: false,
            pending_delegation: None,
            visited_cuts: Vec::new(),
            last_response: None,
            last_error: None,
        }
    }

    pub fn current_server(&self) -> Option<&Arc<NameServerAddress>> {
        self.name_servers.get(self.server_index)
    }

    pub fn advance_server(&mut self) {
        self.server_index += 1;
    }

    pub fn servers_exhausted(&self) -> bool {
        self.server_index >= self.name_servers.len()
    }

    /// Install a new delegation: deeper zone cut, fresh server list.
    pub fn descend(&mut self, zone: Name, servers: Vec<Arc<NameServerAddress>>) {
        self.visited_cuts.push((zone.clone(), servers.clone()));
        self.zone_cut = Some(zone);
        self.name_servers = servers;
        self.server_index = 0;
        self.hop_count += 1;
        self.minimized_extra_labels = 1;
    }
}

/// Explicit frame stack with a hard depth bound: the single global
/// circuit-breaker against resolution loops, independent of native call
/// depth.
#[derive(Debug)]
pub struct FrameStack {
    frames: Vec<ResolveFrame>,
    max_depth: usize,
}

impl FrameStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            frames: Vec::with_capacity(max_depth.min(32)),
            max_depth,
        }
    }

    pub fn push(&mut self, frame: ResolveFrame) -> Result<(), DomainError> {
        if self.frames.len() >= self.max_depth {
            return Err(DomainError::StackDepthExceeded(self.max_depth));
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<ResolveFrame> {
        self.frames.pop()
    }

    pub fn top_mut(&mut self) -> Option<&mut ResolveFrame> {
        self.frames.last_mut()
    }

    pub fn top(&self) -> Option<&ResolveFrame> {
        self.frames.last()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Candidate server domains of every frame below the top, for
    /// delegation-loop inspection of cache-sourced referrals.
    pub fn ancestor_server_domains(&self) -> Vec<Name> {
        let Some(top) = self.frames.len().checked_sub(1) else {
            return Vec::new();
        };
        self.frames[..top]
            .iter()
            .flat_map(|f| f.name_servers.iter())
            .filter_map(|s| s.domain().map(Name::to_lowercase))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::rr::RecordType;
    use std::str::FromStr;

    fn query(name: &str) -> Query {
        let mut q = Query::new();
        q.set_name(Name::from_str(name).unwrap());
        q.set_query_type(RecordType::A);
        q
    }

    #[test]
    fn push_respects_depth_bound() {
        let mut stack = FrameStack::new(2);
        stack
            .push(ResolveFrame::new(query("a.example."), FramePurpose::Question, false))
            .unwrap();
        stack
            .push(ResolveFrame::new(query("b.example."), FramePurpose::Question, false))
            .unwrap();

        let overflow = stack.push(ResolveFrame::new(
            query("c.example."),
            FramePurpose::Question,
            false,
        ));
        assert!(matches!(overflow, Err(DomainError::StackDepthExceeded(2))));
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn descend_tracks_visited_cuts_and_resets_cursor() {
        let mut frame = ResolveFrame::new(query("www.example.com."), FramePurpose::Question, false);
        frame.server_index = 3;

        let servers = vec![Arc::new(
            crate::dns::nameserver::NameServerAddress::parse("192.0.2.53").unwrap(),
        )];
        frame.descend(Name::from_str("com.").unwrap(), servers);

        assert_eq!(frame.server_index, 0);
        assert_eq!(frame.hop_count, 1);
        assert_eq!(frame.visited_cuts.len(), 1);
        assert_eq!(frame.zone_cut.as_ref().unwrap().to_ascii(), "com.");
    }

    #[test]
    fn ancestor_domains_exclude_top_frame() {
        let mut stack = FrameStack::new(4);
        let mut parent = ResolveFrame::new(query("www.example.com."), FramePurpose::Question, false);
        parent.name_servers = vec![Arc::new(
            crate::dns::nameserver::NameServerAddress::parse("ns1.example.com").unwrap(),
        )];
        stack.push(parent).unwrap();
        stack
            .push(ResolveFrame::new(
                query("ns1.example.com."),
                FramePurpose::NsAddress {
                    ns_domain: Name::from_str("ns1.example.com.").unwrap(),
                    queried_aaaa: false,
                },
                false,
            ))
            .unwrap();

        let domains = stack.ancestor_server_domains();
        assert_eq!(domains.len(), 1);
        assert_eq!(domains[0].to_ascii(), "ns1.example.com.");
    }
}
