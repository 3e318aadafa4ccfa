use serde::{Deserialize, Serialize};

/// Cap on `serve_stale_ttl`: stale records are never served more than seven
/// days past expiry (RFC 8767 guidance).
pub const SERVE_STALE_TTL_CAP: u32 = 7 * 24 * 3600;

/// Cap on the TTL attached to answers served stale.
pub const SERVE_STALE_ANSWER_TTL_CAP: u32 = 300;

/// Cache TTL policy and maintenance settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// TTL for cached failure/bad records.
    #[serde(default = "default_failure_ttl")]
    pub failure_ttl: u32,

    /// Fallback TTL for negative answers without a usable SOA.
    #[serde(default = "default_negative_ttl")]
    pub negative_ttl: u32,

    /// Response TTLs are clamped into `[minimum_ttl, maximum_ttl]`.
    #[serde(default = "default_minimum_ttl")]
    pub minimum_ttl: u32,

    #[serde(default = "default_maximum_ttl")]
    pub maximum_ttl: u32,

    /// Window past TTL expiry during which records may still be served
    /// while upstream resolution is failing.
    #[serde(default = "default_serve_stale_ttl")]
    pub serve_stale_ttl: u32,

    /// TTL stamped on answers that are served stale.
    #[serde(default = "default_serve_stale_answer_ttl")]
    pub serve_stale_answer_ttl: u32,

    /// Interval of the background expired-record sweep, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// BIND `named.root` hints file. Falls back to built-in IANA data.
    #[serde(default)]
    pub root_hints_file: Option<String>,

    /// IANA `root-anchors.xml` file. Falls back to built-in anchors.
    #[serde(default)]
    pub trust_anchor_file: Option<String>,
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.minimum_ttl > self.maximum_ttl {
            return Err("cache.minimum_ttl cannot exceed cache.maximum_ttl".to_string());
        }
        if self.serve_stale_ttl > SERVE_STALE_TTL_CAP {
            return Err(format!(
                "cache.serve_stale_ttl cannot exceed {SERVE_STALE_TTL_CAP} seconds"
            ));
        }
        if self.serve_stale_answer_ttl > SERVE_STALE_ANSWER_TTL_CAP {
            return Err(format!(
                "cache.serve_stale_answer_ttl cannot exceed {SERVE_STALE_ANSWER_TTL_CAP} seconds"
            ));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            failure_ttl: default_failure_ttl(),
            negative_ttl: default_negative_ttl(),
            minimum_ttl: default_minimum_ttl(),
            maximum_ttl: default_maximum_ttl(),
            serve_stale_ttl: default_serve_stale_ttl(),
            serve_stale_answer_ttl: default_serve_stale_answer_ttl(),
            sweep_interval_secs: default_sweep_interval(),
            root_hints_file: None,
            trust_anchor_file: None,
        }
    }
}

fn default_failure_ttl() -> u32 {
    10
}

fn default_negative_ttl() -> u32 {
    300
}

fn default_minimum_ttl() -> u32 {
    10
}

fn default_maximum_ttl() -> u32 {
    604_800
}

fn default_serve_stale_ttl() -> u32 {
    259_200
}

fn default_serve_stale_answer_ttl() -> u32 {
    30
}

fn default_sweep_interval() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_stale_caps_enforced() {
        let mut config = CacheConfig::default();
        config.validate().unwrap();

        config.serve_stale_ttl = SERVE_STALE_TTL_CAP + 1;
        assert!(config.validate().is_err());

        config.serve_stale_ttl = SERVE_STALE_TTL_CAP;
        config.serve_stale_answer_ttl = SERVE_STALE_ANSWER_TTL_CAP + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn ttl_bounds_must_be_ordered() {
        let config = CacheConfig {
            minimum_ttl: 100,
            maximum_ttl: 50,
            ..CacheConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
