//! Single-server message exchange: query construction, 0x20 name
//! randomization, UDP with transparent TCP escalation on truncation, and
//! response validation against the sent question.

use crate::dns::transport::Transport;
use boreal_dns_domain::DomainError;
use hickory_proto::op::{Edns, Message, MessageType, OpCode, Query};
use hickory_proto::rr::Name;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, trace};

/// EDNS advertised payload size (DNS flag day 2020 value).
const EDNS_PAYLOAD_SIZE: u16 = 1232;

/// Build an outgoing query message.
pub fn build_query(question: Query, edns: bool, dnssec_ok: bool, recursion_desired: bool) -> Message {
    let mut message = Message::new(fastrand::u16(..), MessageType::Query, OpCode::Query);
    message.set_recursion_desired(recursion_desired);
    message.add_query(question);
    if edns {
        let ext = message.extensions_mut().get_or_insert_with(Edns::new);
        ext.set_max_payload(EDNS_PAYLOAD_SIZE);
        ext.set_version(0);
        ext.set_dnssec_ok(dnssec_ok);
    }
    message
}

/// Randomize the letter case of a name (0x20 encoding). The response must
/// echo the exact casing, raising the bar for off-path forgery.
pub fn randomize_name_case(name: &Name) -> Name {
    let text: String = name
        .to_ascii()
        .chars()
        .map(|c| {
            if c.is_ascii_alphabetic() && fastrand::bool() {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            }
        })
        .collect();
    Name::from_str(&text).unwrap_or_else(|_| name.clone())
}

/// Check that a response actually answers the request: matching ID and a
/// byte-exact question echo (exact case when 0x20 encoding was applied).
pub fn response_matches(request: &Message, response: &Message) -> bool {
    if request.id() != response.id() {
        return false;
    }
    match (request.queries().first(), response.queries().first()) {
        (Some(req_q), Some(resp_q)) => {
            req_q.name().to_ascii() == resp_q.name().to_ascii()
                && req_q.query_type() == resp_q.query_type()
                && req_q.query_class() == resp_q.query_class()
        }
        (None, _) => true,
        (Some(_), None) => false,
    }
}

/// Exchange a message with one server: UDP first, transparent TCP retry
/// on truncation or response-validation failure.
pub async fn exchange(
    addr: SocketAddr,
    request: &Message,
    timeout: Duration,
) -> Result<Message, DomainError> {
    let wire = request
        .to_vec()
        .map_err(|e| DomainError::InvalidDnsResponse(format!("Failed to encode query: {e}")))?;

    let udp = Transport::udp(addr);
    match udp.send(&wire, timeout).await {
        Ok(raw) => {
            match Message::from_vec(&raw.bytes) {
                Ok(response) if response.truncated() => {
                    trace!(server = %addr, "Truncated response, retrying over TCP");
                    exchange_tcp(addr, &wire, request, timeout).await
                }
                Ok(response) if response_matches(request, &response) => Ok(response),
                Ok(_) => {
                    // ID or question mismatch over UDP smells like spoofing;
                    // TCP is immune to blind injection.
                    debug!(server = %addr, "UDP response failed validation, retrying over TCP");
                    exchange_tcp(addr, &wire, request, timeout).await
                }
                Err(e) => {
                    debug!(server = %addr, error = %e, "Unparseable UDP response, retrying over TCP");
                    exchange_tcp(addr, &wire, request, timeout).await
                }
            }
        }
        Err(e) => Err(e),
    }
}

async fn exchange_tcp(
    addr: SocketAddr,
    wire: &[u8],
    request: &Message,
    timeout: Duration,
) -> Result<Message, DomainError> {
    let tcp = Transport::tcp(addr);
    let raw = tcp.send(wire, timeout).await?;
    let response = Message::from_vec(&raw.bytes)
        .map_err(|e| DomainError::InvalidDnsResponse(format!("Bad TCP response: {e}")))?;
    if !response_matches(request, &response) {
        return Err(DomainError::InvalidDnsResponse(format!(
            "TCP response from {addr} does not match the question"
        )));
    }
    Ok(response)
}
