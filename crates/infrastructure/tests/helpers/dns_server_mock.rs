#![allow(dead_code)]
//! Scripted mock DNS server for integration tests.
//!
//! Binds a UDP socket on a random loopback port and answers every query
//! through a user-provided handler. The handler sees the parsed request
//! plus a global sequence number, so tests can script multi-step
//! delegation walks on a single socket.

use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::rdata::{A, CNAME, NS, SOA};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;

pub type Handler = Arc<dyn Fn(&Message, usize) -> Option<Message> + Send + Sync>;

pub struct MockDnsServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    queries_served: Arc<AtomicUsize>,
}

impl MockDnsServer {
    pub async fn start(handler: Handler) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        let addr = socket.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let queries_served = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&queries_served);

        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    result = socket.recv_from(&mut buf) => {
                        let Ok((len, peer)) = result else { break };
                        let Ok(request) = Message::from_vec(&buf[..len]) else { continue };
                        let seq = counter.fetch_add(1, Ordering::SeqCst);
                        if let Some(mut response) = handler(&request, seq) {
                            response.set_id(request.id());
                            if let Ok(wire) = response.to_vec() {
                                let _ = socket.send_to(&wire, peer).await;
                            }
                        }
                    }
                }
            }
        });

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            queries_served,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn queries_served(&self) -> usize {
        self.queries_served.load(Ordering::SeqCst)
    }
}

impl Drop for MockDnsServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Response skeleton echoing the request's question byte-for-byte (the
/// resolver rejects replies that do not echo its 0x20-randomized name).
pub fn respond_to(request: &Message) -> Message {
    let mut response = Message::new(request.id(), MessageType::Response, OpCode::Query);
    for query in request.queries() {
        response.add_query(query.clone());
    }
    response.set_response_code(ResponseCode::NoError);
    response
}

/// Lowercased FQDN text of the request's question name.
pub fn qname_of(request: &Message) -> String {
    request
        .queries()
        .first()
        .map(|q| {
            let mut n = q.name().to_lowercase();
            n.set_fqdn(true);
            n.to_ascii()
        })
        .unwrap_or_default()
}

pub fn qtype_of(request: &Message) -> RecordType {
    request
        .queries()
        .first()
        .map(|q| q.query_type())
        .unwrap_or(RecordType::A)
}

pub fn name(text: &str) -> Name {
    Name::from_str(text).unwrap()
}

pub fn a_record(owner: &str, ttl: u32, ip: Ipv4Addr) -> Record {
    Record::from_rdata(name(owner), ttl, RData::A(A(ip)))
}

pub fn ns_record(owner: &str, target: &str, ttl: u32) -> Record {
    Record::from_rdata(name(owner), ttl, RData::NS(NS(name(target))))
}

pub fn cname_record(owner: &str, target: &str, ttl: u32) -> Record {
    Record::from_rdata(name(owner), ttl, RData::CNAME(CNAME(name(target))))
}

pub fn soa_record(zone: &str, minimum: u32, ttl: u32) -> Record {
    Record::from_rdata(
        name(zone),
        ttl,
        RData::SOA(SOA::new(
            name(&format!("ns1.{}", zone.trim_start_matches('.'))),
            name(&format!("hostmaster.{}", zone.trim_start_matches('.'))),
            2024_01_01_01,
            7200,
            900,
            1_209_600,
            minimum,
        )),
    )
}

/// A record with raw RDATA bytes under an arbitrary type code. Round-trips
/// through the wire into the real typed record on the resolver side;
/// tests use it to fabricate DNSSEC records without signing anything.
pub fn raw_record(owner: &str, type_code: u16, ttl: u32, rdata: Vec<u8>) -> Record {
    Record::from_rdata(
        name(owner),
        ttl,
        RData::Unknown {
            code: type_code.into(),
            rdata: hickory_proto::rr::rdata::NULL::with(rdata),
        },
    )
}

/// Fabricated (never verifiable) RRSIG RDATA covering `type_covered`,
/// signed by `signer`, valid around now.
pub fn fake_rrsig_rdata(type_covered: u16, labels: u8, signer: &str) -> Vec<u8> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as u32;

    let mut rdata = Vec::new();
    rdata.extend_from_slice(&type_covered.to_be_bytes());
    rdata.push(13); // ECDSA P-256
    rdata.push(labels);
    rdata.extend_from_slice(&300u32.to_be_bytes());
    rdata.extend_from_slice(&(now + 3600).to_be_bytes());
    rdata.extend_from_slice(&(now.saturating_sub(3600)).to_be_bytes());
    rdata.extend_from_slice(&0x1234u16.to_be_bytes());
    for label in name(signer).iter() {
        rdata.push(label.len() as u8);
        rdata.extend_from_slice(label);
    }
    rdata.push(0);
    rdata.extend_from_slice(&[0xAB; 64]);
    rdata
}
