//! Root server bootstrap: BIND `named.root` hints file with built-in IANA
//! fallback data.

use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{Name, RData, Record};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

/// TTL of the synthetic root NS set (the value carried by `named.root`).
const ROOT_HINTS_TTL: u32 = 3_600_000;

/// Built-in IANA root servers, used when no hints file is configured or the
/// configured one cannot be read.
const BUILTIN_ROOTS: &[(&str, &str, &str)] = &[
    ("a.root-servers.net.", "198.41.0.4", "2001:503:ba3e::2:30"),
    ("b.root-servers.net.", "170.247.170.2", "2801:1b8:10::b"),
    ("c.root-servers.net.", "192.33.4.12", "2001:500:2::c"),
    ("d.root-servers.net.", "199.7.91.13", "2001:500:2d::d"),
    ("e.root-servers.net.", "192.203.230.10", "2001:500:a8::e"),
    ("f.root-servers.net.", "192.5.5.241", "2001:500:2f::f"),
    ("g.root-servers.net.", "192.112.36.4", "2001:500:12::d0d"),
    ("h.root-servers.net.", "198.97.190.53", "2001:500:1::53"),
    ("i.root-servers.net.", "192.36.148.17", "2001:7fe::53"),
    ("j.root-servers.net.", "192.58.128.30", "2001:503:c27::2:30"),
    ("k.root-servers.net.", "193.0.14.129", "2001:7fd::1"),
    ("l.root-servers.net.", "199.7.83.42", "2001:500:9f::42"),
    ("m.root-servers.net.", "202.12.27.33", "2001:dc3::35"),
];

/// One root server with its glue addresses.
#[derive(Debug, Clone)]
pub struct RootServer {
    pub name: Name,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

impl RootServer {
    /// A/AAAA glue records for embedding in the synthetic root NS set.
    pub fn glue_records(&self, ttl: u32) -> Vec<Record> {
        let mut records = Vec::with_capacity(2);
        if let Some(v4) = self.ipv4 {
            records.push(Record::from_rdata(self.name.clone(), ttl, RData::A(A(v4))));
        }
        if let Some(v6) = self.ipv6 {
            records.push(Record::from_rdata(
                self.name.clone(),
                ttl,
                RData::AAAA(AAAA(v6)),
            ));
        }
        records
    }

    pub fn socket_addrs(&self, prefer_ipv6: bool) -> Vec<SocketAddr> {
        let mut addrs = Vec::with_capacity(2);
        if let Some(v4) = self.ipv4 {
            addrs.push(SocketAddr::new(IpAddr::V4(v4), 53));
        }
        if let Some(v6) = self.ipv6 {
            let addr = SocketAddr::new(IpAddr::V6(v6), 53);
            if prefer_ipv6 {
                addrs.insert(0, addr);
            } else {
                addrs.push(addr);
            }
        }
        addrs
    }
}

/// The root server set used to seed the cache.
#[derive(Debug, Clone)]
pub struct RootHints {
    servers: Vec<RootServer>,
    ttl: u32,
}

impl RootHints {
    pub fn builtin() -> Self {
        let servers = BUILTIN_ROOTS
            .iter()
            .map(|(name, v4, v6)| RootServer {
                name: Name::from_str(name).expect("builtin root name"),
                ipv4: v4.parse().ok(),
                ipv6: v6.parse().ok(),
            })
            .collect();
        Self {
            servers,
            ttl: ROOT_HINTS_TTL,
        }
    }

    /// Parse a BIND `named.root` file: `NAME TTL [CLASS] TYPE RDATA` lines,
    /// `;` comments. Only NS/A/AAAA lines are meaningful.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut ns_names: Vec<Name> = Vec::new();
        let mut addresses: BTreeMap<String, (Option<Ipv4Addr>, Option<Ipv6Addr>)> = BTreeMap::new();
        let mut ttl = ROOT_HINTS_TTL;

        for line in raw.lines() {
            let line = line.split(';').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                continue;
            }

            // CLASS is optional; locate the type token.
            let (rtype_idx, rtype) = match fields
                .iter()
                .enumerate()
                .skip(2)
                .find(|(_, f)| matches!(f.to_ascii_uppercase().as_str(), "NS" | "A" | "AAAA"))
            {
                Some((i, f)) => (i, f.to_ascii_uppercase()),
                None => continue,
            };
            let Some(rdata) = fields.get(rtype_idx + 1) else {
                continue;
            };
            if let Ok(parsed_ttl) = fields[1].parse::<u32>() {
                ttl = parsed_ttl;
            }

            match rtype.as_str() {
                "NS" => {
                    if let Ok(name) = Name::from_str(&rdata.to_lowercase()) {
                        ns_names.push(name);
                    }
                }
                "A" => {
                    if let Ok(v4) = rdata.parse::<Ipv4Addr>() {
                        addresses
                            .entry(fields[0].to_lowercase())
                            .or_default()
                            .0 = Some(v4);
                    }
                }
                "AAAA" => {
                    if let Ok(v6) = rdata.parse::<Ipv6Addr>() {
                        addresses
                            .entry(fields[0].to_lowercase())
                            .or_default()
                            .1 = Some(v6);
                    }
                }
                _ => {}
            }
        }

        let servers: Vec<RootServer> = ns_names
            .into_iter()
            .map(|name| {
                let key = name.to_ascii().to_lowercase();
                let (ipv4, ipv6) = addresses.get(&key).copied().unwrap_or((None, None));
                RootServer { name, ipv4, ipv6 }
            })
            .collect();

        if servers.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "no NS lines in root hints file",
            ));
        }

        Ok(Self { servers, ttl })
    }

    /// Load hints from the configured file, falling back to built-in data.
    pub fn load(path: Option<&str>) -> Self {
        match path {
            Some(p) => match Self::from_file(Path::new(p)) {
                Ok(hints) => {
                    info!(file = p, servers = hints.servers.len(), "Root hints loaded");
                    hints
                }
                Err(e) => {
                    warn!(file = p, error = %e, "Root hints unreadable, using built-in");
                    Self::builtin()
                }
            },
            None => Self::builtin(),
        }
    }

    pub fn servers(&self) -> &[RootServer] {
        &self.servers
    }

    pub fn ttl(&self) -> u32 {
        self.ttl
    }
}
