use serde::{Deserialize, Serialize};

/// Resolver settings.
///
/// With an empty `forwarders` list the engine resolves recursively from the
/// root servers; otherwise every question is forwarded to the configured
/// servers (address syntax: `ip[:port]`, `name[:port]` or an `https://` URL).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DnsConfig {
    #[serde(default)]
    pub forwarders: Vec<String>,

    /// SOCKS-style proxy endpoint. When set, name-server names are left to
    /// the proxy to resolve instead of being chased by the engine.
    #[serde(default)]
    pub proxy: Option<String>,

    #[serde(default = "default_false")]
    pub prefer_ipv6: bool,

    /// 0x20 mixed-case encoding of query names (cache-poisoning hardening).
    #[serde(default = "default_true")]
    pub randomize_name: bool,

    /// QNAME minimization (RFC 7816).
    #[serde(default = "default_true")]
    pub qname_minimization: bool,

    /// Minimization hops after which the minimized walk gives up and the
    /// full name is queried. Compatibility policy, not a protocol rule.
    #[serde(default = "default_max_minimization_hops")]
    pub max_minimization_hops: u32,

    /// Re-validate parent-side delegations in the background after a
    /// successful resolution (draft-ietf-dnsop-ns-revalidation).
    #[serde(default = "default_false")]
    pub ns_revalidation: bool,

    #[serde(default = "default_false")]
    pub dnssec_validation: bool,

    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Per-query timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Name servers queried in parallel during fan-out.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Bound on the explicit resolver frame stack. The single global
    /// circuit-breaker against resolution loops.
    #[serde(default = "default_max_stack_depth")]
    pub max_stack_depth: usize,

    /// Bound on delegations followed within one frame.
    #[serde(default = "default_max_delegation_hops")]
    pub max_delegation_hops: u32,

    /// Port queried on delegated name servers. Standard DNS except in
    /// containerized or test environments.
    #[serde(default = "default_delegation_port")]
    pub delegation_port: u16,
}

impl DnsConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.retries == 0 {
            return Err("dns.retries must be at least 1".to_string());
        }
        if self.concurrency == 0 {
            return Err("dns.concurrency must be at least 1".to_string());
        }
        if self.max_stack_depth == 0 {
            return Err("dns.max_stack_depth must be at least 1".to_string());
        }
        if self.timeout_ms < 100 {
            return Err("dns.timeout_ms must be at least 100".to_string());
        }
        Ok(())
    }

    /// Recursive-from-root mode (no configured forwarders).
    pub fn is_recursive(&self) -> bool {
        self.forwarders.is_empty()
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            forwarders: vec![],
            proxy: None,
            prefer_ipv6: false,
            randomize_name: true,
            qname_minimization: true,
            max_minimization_hops: default_max_minimization_hops(),
            ns_revalidation: false,
            dnssec_validation: false,
            retries: default_retries(),
            timeout_ms: default_timeout_ms(),
            concurrency: default_concurrency(),
            max_stack_depth: default_max_stack_depth(),
            max_delegation_hops: default_max_delegation_hops(),
            delegation_port: default_delegation_port(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_max_minimization_hops() -> u32 {
    10
}

fn default_retries() -> u32 {
    2
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_concurrency() -> usize {
    2
}

fn default_max_stack_depth() -> usize {
    16
}

fn default_max_delegation_hops() -> u32 {
    16
}

fn default_delegation_port() -> u16 {
    53
}
