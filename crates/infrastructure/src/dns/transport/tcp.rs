use super::{DnsTransport, TransportResponse};
use async_trait::async_trait;
use boreal_dns_domain::DomainError;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// DNS over TCP with the RFC 1035 two-byte length prefix. Used when a UDP
/// response comes back truncated or a server only answers on TCP.
pub struct TcpTransport {
    server_addr: SocketAddr,
}

impl TcpTransport {
    pub fn new(server_addr: SocketAddr) -> Self {
        Self { server_addr }
    }

    fn map_io(&self, e: std::io::Error) -> DomainError {
        match e.kind() {
            std::io::ErrorKind::ConnectionRefused => DomainError::TransportConnectionRefused {
                server: self.server_addr.to_string(),
            },
            std::io::ErrorKind::ConnectionReset => DomainError::TransportConnectionReset {
                server: self.server_addr.to_string(),
            },
            _ => DomainError::IoError(format!("TCP error with {}: {e}", self.server_addr)),
        }
    }

    fn timeout_err(&self) -> DomainError {
        DomainError::TransportTimeout {
            server: self.server_addr.to_string(),
        }
    }
}

#[async_trait]
impl DnsTransport for TcpTransport {
    async fn send(
        &self,
        message_bytes: &[u8],
        timeout: Duration,
    ) -> Result<TransportResponse, DomainError> {
        let mut stream = tokio::time::timeout(timeout, TcpStream::connect(self.server_addr))
            .await
            .map_err(|_| self.timeout_err())?
            .map_err(|e| self.map_io(e))?;

        let len = message_bytes.len() as u16;
        tokio::time::timeout(timeout, async {
            stream.write_all(&len.to_be_bytes()).await?;
            stream.write_all(message_bytes).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| self.timeout_err())?
        .map_err(|e| self.map_io(e))?;

        let mut len_buf = [0u8; 2];
        tokio::time::timeout(timeout, stream.read_exact(&mut len_buf))
            .await
            .map_err(|_| self.timeout_err())?
            .map_err(|e| self.map_io(e))?;

        let response_len = u16::from_be_bytes(len_buf) as usize;
        let mut response = vec![0u8; response_len];
        tokio::time::timeout(timeout, stream.read_exact(&mut response))
            .await
            .map_err(|_| self.timeout_err())?
            .map_err(|e| self.map_io(e))?;

        debug!(
            server = %self.server_addr,
            bytes_received = response_len,
            "TCP response received"
        );

        Ok(TransportResponse {
            bytes: response,
            protocol_used: "TCP",
        })
    }

    fn protocol_name(&self) -> &'static str {
        "TCP"
    }
}
