//! Configuration for the resolution engine.
//!
//! - `dns`: resolver settings (forwarders, recursion, DNSSEC, limits)
//! - `cache`: TTL policy and sweep settings
//! - `logging`: logging settings

pub mod cache;
pub mod dns;
pub mod logging;

pub use cache::CacheConfig;
pub use dns::DnsConfig;
pub use logging::LoggingConfig;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Values passed on the command line that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub forwarders: Option<Vec<String>>,
    pub dnssec_validation: Option<bool>,
    pub log_level: Option<String>,
}

/// Top-level configuration, loaded once at process start.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub dns: DnsConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from an optional TOML file and apply CLI
    /// overrides. A missing path yields defaults.
    pub fn load(path: Option<&str>, overrides: CliOverrides) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p).map_err(|e| ConfigError::Io {
                    path: p.to_string(),
                    reason: e.to_string(),
                })?;
                toml::from_str(&raw).map_err(|e| ConfigError::Parse {
                    path: p.to_string(),
                    reason: e.to_string(),
                })?
            }
            None => Config::default(),
        };

        if let Some(forwarders) = overrides.forwarders {
            config.dns.forwarders = forwarders;
        }
        if let Some(dnssec) = overrides.dnssec_validation {
            config.dns.dnssec_validation = dnssec;
        }
        if let Some(level) = overrides.log_level {
            config.logging.level = level;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.dns.validate().map_err(ConfigError::Invalid)?;
        self.cache.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }
}
