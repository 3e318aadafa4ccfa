use arc_swap::ArcSwapOption;
use hickory_proto::rr::Name;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long a resolved IP endpoint stays fresh before the server's own
/// address must be re-resolved. Independent of any DNS RRset TTL.
const ENDPOINT_TTL: Duration = Duration::from_secs(900);

const DEFAULT_DNS_PORT: u16 = 53;

/// Transport protocol of a name server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerProtocol {
    Udp,
    Tcp,
    Https,
}

/// Logical identity of a name server: a bare IP endpoint, a domain name
/// that must itself be resolved, or a DNS-over-HTTPS URL.
#[derive(Debug, Clone)]
pub enum ServerEndpoint {
    Ip(SocketAddr),
    Domain { name: Name, port: u16 },
    Url(String),
}

#[derive(Debug)]
struct ResolvedEndpoint {
    addr: SocketAddr,
    resolved_at: Instant,
}

/// A name server address with an IP-endpoint cache.
///
/// The endpoint slot is an atomic swap: readers get the last resolved
/// address lock-free, the resolver refreshes it when it goes stale.
#[derive(Debug)]
pub struct NameServerAddress {
    endpoint: ServerEndpoint,
    protocol: ServerProtocol,
    resolved: ArcSwapOption<ResolvedEndpoint>,
}

impl Clone for NameServerAddress {
    fn clone(&self) -> Self {
        Self {
            endpoint: self.endpoint.clone(),
            protocol: self.protocol,
            resolved: ArcSwapOption::new(self.resolved.load_full()),
        }
    }
}

impl NameServerAddress {
    pub fn from_ip(addr: SocketAddr) -> Self {
        Self {
            endpoint: ServerEndpoint::Ip(addr),
            protocol: ServerProtocol::Udp,
            resolved: ArcSwapOption::new(None),
        }
    }

    pub fn from_domain(name: Name, port: u16) -> Self {
        Self {
            endpoint: ServerEndpoint::Domain { name, port },
            protocol: ServerProtocol::Udp,
            resolved: ArcSwapOption::new(None),
        }
    }

    pub fn from_url(url: String) -> Self {
        Self {
            endpoint: ServerEndpoint::Url(url),
            protocol: ServerProtocol::Https,
            resolved: ArcSwapOption::new(None),
        }
    }

    /// Parse `ip[:port]`, `name[:port]` or an `https://` URL.
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("empty name server address".to_string());
        }
        if text.starts_with("https://") {
            return Ok(Self::from_url(text.to_string()));
        }
        if let Ok(addr) = SocketAddr::from_str(text) {
            return Ok(Self::from_ip(addr));
        }
        if let Ok(ip) = IpAddr::from_str(text) {
            return Ok(Self::from_ip(SocketAddr::new(ip, DEFAULT_DNS_PORT)));
        }

        let (host, port) = match text.rsplit_once(':') {
            Some((host, port_str)) if !host.contains(':') => {
                let port = port_str
                    .parse::<u16>()
                    .map_err(|_| format!("Bad port in name server address: {text}"))?;
                (host, port)
            }
            _ => (text, DEFAULT_DNS_PORT),
        };
        let name =
            Name::from_str(host).map_err(|e| format!("Bad name server domain {host}: {e}"))?;
        Ok(Self::from_domain(name, port))
    }

    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    pub fn protocol(&self) -> ServerProtocol {
        self.protocol
    }

    /// The domain name that must be resolved before this server can be
    /// queried directly, if any.
    pub fn domain(&self) -> Option<&Name> {
        match &self.endpoint {
            ServerEndpoint::Domain { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn port(&self) -> u16 {
        match &self.endpoint {
            ServerEndpoint::Ip(addr) => addr.port(),
            ServerEndpoint::Domain { port, .. } => *port,
            ServerEndpoint::Url(_) => 443,
        }
    }

    /// The current transport endpoint: a literal IP immediately, a
    /// resolved endpoint while it is fresh, nothing otherwise.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match &self.endpoint {
            ServerEndpoint::Ip(addr) => Some(*addr),
            ServerEndpoint::Url(_) => None,
            ServerEndpoint::Domain { .. } => {
                let resolved = self.resolved.load();
                resolved.as_ref().and_then(|r| {
                    (r.resolved_at.elapsed() < ENDPOINT_TTL).then_some(r.addr)
                })
            }
        }
    }

    /// True when the server cannot be queried without first resolving its
    /// own address.
    pub fn needs_resolution(&self) -> bool {
        matches!(self.endpoint, ServerEndpoint::Domain { .. }) && self.socket_addr().is_none()
    }

    /// Install a freshly resolved IP for a domain endpoint.
    pub fn set_resolved(&self, ip: IpAddr) {
        if let ServerEndpoint::Domain { port, .. } = &self.endpoint {
            self.resolved.store(Some(Arc::new(ResolvedEndpoint {
                addr: SocketAddr::new(ip, *port),
                resolved_at: Instant::now(),
            })));
        }
    }
}

impl fmt::Display for NameServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.endpoint {
            ServerEndpoint::Ip(addr) => write!(f, "{addr}"),
            ServerEndpoint::Domain { name, port } => write!(f, "{name}:{port}"),
            ServerEndpoint::Url(url) => f.write_str(url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ip_forms() {
        let bare = NameServerAddress::parse("9.9.9.9").unwrap();
        assert_eq!(bare.socket_addr().unwrap().port(), 53);

        let with_port = NameServerAddress::parse("9.9.9.9:5353").unwrap();
        assert_eq!(with_port.socket_addr().unwrap().port(), 5353);

        let v6 = NameServerAddress::parse("2620:fe::fe").unwrap();
        assert!(v6.socket_addr().unwrap().is_ipv6());
        assert!(!v6.needs_resolution());
    }

    #[test]
    fn parses_domain_forms() {
        let server = NameServerAddress::parse("dns.quad9.net").unwrap();
        assert!(server.needs_resolution());
        assert!(server.socket_addr().is_none());
        assert_eq!(server.port(), 53);

        let with_port = NameServerAddress::parse("dns.quad9.net:5353").unwrap();
        assert_eq!(with_port.port(), 5353);
    }

    #[test]
    fn parses_doh_url() {
        let server = NameServerAddress::parse("https://dns.quad9.net/dns-query").unwrap();
        assert_eq!(server.protocol(), ServerProtocol::Https);
        assert!(!server.needs_resolution());
        assert!(server.socket_addr().is_none());
    }

    #[test]
    fn resolved_endpoint_is_cached() {
        let server = NameServerAddress::parse("dns.quad9.net").unwrap();
        assert!(server.needs_resolution());

        server.set_resolved(IpAddr::from_str("9.9.9.9").unwrap());
        assert!(!server.needs_resolution());
        assert_eq!(
            server.socket_addr().unwrap(),
            SocketAddr::from_str("9.9.9.9:53").unwrap()
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(NameServerAddress::parse("").is_err());
        assert!(NameServerAddress::parse("host:notaport").is_err());
    }
}
