//! Multi-server fan-out for forwarding mode: race the configured servers
//! with bounded concurrency, first decisive answer wins.

use super::query::exchange;
use crate::dns::nameserver::NameServerAddress;
use boreal_dns_domain::DomainError;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use hickory_proto::op::{Message, ResponseCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Race `servers` for one request.
///
/// Up to `concurrency` workers pull server slots from a shared cursor (the
/// list is walked `retries` times); the first NoError/NxDomain response
/// cancels the rest. The overall deadline is
/// `timeout × retries × ceil(servers / concurrency)` so a full hang of
/// every server still terminates.
pub async fn resolve_fanout(
    servers: &[Arc<NameServerAddress>],
    request: &Message,
    per_query_timeout: Duration,
    retries: u32,
    concurrency: usize,
) -> Result<Message, DomainError> {
    if servers.is_empty() {
        return Err(DomainError::NoNameServers);
    }

    let total_attempts = servers.len() * retries.max(1) as usize;
    let workers = concurrency.clamp(1, total_attempts);
    let rounds = servers.len().div_ceil(workers) as u32;
    let deadline = per_query_timeout * retries.max(1) * rounds;

    debug!(
        servers = servers.len(),
        workers,
        deadline_ms = deadline.as_millis() as u64,
        "Racing name servers"
    );

    // The cursor is the only shared state; the lock covers just the
    // increment, never any I/O.
    let cursor = Arc::new(Mutex::new(0usize));
    let mut abort_handles = Vec::with_capacity(workers);
    let mut futs = FuturesUnordered::new();

    for _ in 0..workers {
        let cursor = Arc::clone(&cursor);
        let servers: Vec<Arc<NameServerAddress>> = servers.to_vec();
        let request = request.clone();
        let handle = tokio::spawn(async move {
            let mut last_error: Option<DomainError> = None;
            loop {
                let attempt = {
                    let mut slot = cursor.lock().await;
                    let attempt = *slot;
                    *slot += 1;
                    attempt
                };
                if attempt >= total_attempts {
                    return Err(last_error.unwrap_or(DomainError::NoNameServers));
                }

                let server = &servers[attempt % servers.len()];
                let Some(addr) = server.socket_addr() else {
                    last_error = Some(DomainError::ServerFailure {
                        domain: server.to_string(),
                        reason: "no resolved endpoint".to_string(),
                    });
                    continue;
                };

                match exchange(addr, &request, per_query_timeout).await {
                    Ok(response)
                        if matches!(
                            response.response_code(),
                            ResponseCode::NoError | ResponseCode::NXDomain
                        ) =>
                    {
                        return Ok(response);
                    }
                    Ok(response) => {
                        debug!(server = %addr, rcode = ?response.response_code(), "Non-decisive answer");
                        last_error = Some(DomainError::ServerFailure {
                            domain: server.to_string(),
                            reason: format!("rcode {:?}", response.response_code()),
                        });
                    }
                    Err(e) => {
                        debug!(server = %addr, error = %e, "Server query failed");
                        last_error = Some(e);
                    }
                }
            }
        });
        abort_handles.push(handle.abort_handle());
        futs.push(handle);
    }

    let raced = timeout(deadline, async {
        let mut last_error: Option<DomainError> = None;
        while let Some(join_result) = futs.next().await {
            match join_result {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) => last_error = Some(e),
                Err(e) => warn!(error = %e, "Fan-out worker panicked"),
            }
        }
        Err(last_error.unwrap_or(DomainError::NoNameServers))
    })
    .await;

    for handle in &abort_handles {
        handle.abort();
    }

    match raced {
        Ok(result) => result,
        Err(_) => Err(DomainError::QueryTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{MessageType, OpCode, Query};
    use hickory_proto::rr::{Name, RecordType};
    use std::str::FromStr;

    fn request() -> Message {
        let mut message = Message::new(7, MessageType::Query, OpCode::Query);
        let mut query = Query::new();
        query.set_name(Name::from_str("example.com.").unwrap());
        query.set_query_type(RecordType::A);
        message.add_query(query);
        message
    }

    #[tokio::test]
    async fn empty_server_list_fails_immediately() {
        let result = resolve_fanout(&[], &request(), Duration::from_millis(100), 1, 2).await;
        assert!(matches!(result, Err(DomainError::NoNameServers)));
    }

    #[tokio::test]
    async fn unresolved_domain_servers_fail_without_network() {
        let servers = vec![Arc::new(
            NameServerAddress::parse("upstream.invalid").unwrap(),
        )];
        let result = resolve_fanout(&servers, &request(), Duration::from_millis(100), 1, 2).await;
        assert!(matches!(result, Err(DomainError::ServerFailure { .. })));
    }
}
