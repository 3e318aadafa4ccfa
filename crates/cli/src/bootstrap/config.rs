use boreal_dns_domain::{CliOverrides, Config};
use tracing::info;

pub fn load_config(config_path: Option<&str>, overrides: CliOverrides) -> anyhow::Result<Config> {
    let config = Config::load(config_path, overrides)?;
    config.validate()?;

    info!(
        config_file = config_path.unwrap_or("default"),
        recursive = config.dns.is_recursive(),
        forwarders = config.dns.forwarders.len(),
        dnssec = config.dns.dnssec_validation,
        qname_minimization = config.dns.qname_minimization,
        "Configuration loaded"
    );

    Ok(config)
}
