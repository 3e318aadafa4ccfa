//! # Boreal DNS
//!
//! One-shot resolver front end: loads configuration, builds the cache and
//! the recursive resolver, resolves the given name and prints the result.

mod bootstrap;

use boreal_dns_application::ResolveQueryUseCase;
use boreal_dns_domain::{CliOverrides, DnsQuery, RecordType};
use boreal_dns_infrastructure::dns::cache::{RecordCache, TtlPolicy};
use boreal_dns_infrastructure::dns::dnssec::TrustAnchorStore;
use boreal_dns_infrastructure::dns::root_hints::RootHints;
use boreal_dns_infrastructure::dns::RecursiveResolver;
use boreal_dns_jobs::{CacheSweepJob, JobRunner};
use clap::Parser;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "boreal-dns")]
#[command(version)]
#[command(about = "Recursive DNS resolver with a DNSSEC-aware cache")]
struct Cli {
    /// Name to resolve
    name: String,

    /// Record type to query
    #[arg(default_value = "A")]
    record_type: String,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Forward to these servers instead of recursing from the root
    #[arg(short = 'f', long = "forwarder")]
    forwarders: Vec<String>,

    /// Enable DNSSEC validation
    #[arg(long)]
    dnssec: bool,

    /// Log level override
    #[arg(long)]
    log_level: Option<String>,

    /// Print the resolution as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let overrides = CliOverrides {
        forwarders: (!cli.forwarders.is_empty()).then(|| cli.forwarders.clone()),
        dnssec_validation: cli.dnssec.then_some(true),
        log_level: cli.log_level.clone(),
    };
    let config = bootstrap::config::load_config(cli.config.as_deref(), overrides)?;
    bootstrap::logging::init_logging(&config);

    let record_type = RecordType::from_str(&cli.record_type)
        .map_err(|e| anyhow::anyhow!("unsupported record type: {e}"))?;

    let root_hints = RootHints::load(config.cache.root_hints_file.as_deref());
    let trust_anchors = TrustAnchorStore::load(config.cache.trust_anchor_file.as_deref());
    let cache = Arc::new(RecordCache::new(
        TtlPolicy::from_config(&config.cache),
        root_hints.clone(),
    ));

    let resolver = Arc::new(RecursiveResolver::new(
        config.dns.clone(),
        Arc::clone(&cache),
        trust_anchors,
        root_hints,
    )?);

    JobRunner::new()
        .with_cache_sweep(CacheSweepJob::new(
            cache.clone(),
            config.cache.sweep_interval_secs,
        ))
        .start()
        .await;

    let use_case = ResolveQueryUseCase::new(resolver);
    let query = DnsQuery::new(cli.name.as_str(), record_type);

    match use_case.execute(&query).await {
        Ok(resolution) => {
            if cli.json {
                let value = serde_json::json!({
                    "name": cli.name,
                    "type": record_type.as_str(),
                    "addresses": resolution.addresses.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
                    "cname_chain": resolution.cname_chain.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
                    "ttl": resolution.min_ttl,
                    "dnssec": resolution.dnssec_status,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                for cname in resolution.cname_chain.iter() {
                    println!("{}\tCNAME\t{cname}", cli.name);
                }
                for address in resolution.addresses.iter() {
                    println!(
                        "{}\t{}\t{address}\tttl={}",
                        cli.name,
                        record_type,
                        resolution.min_ttl.unwrap_or(0)
                    );
                }
                if let Some(status) = resolution.dnssec_status {
                    eprintln!("; dnssec: {status}");
                }
            }
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!("{e}")),
    }
}
