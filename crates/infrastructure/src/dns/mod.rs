pub mod cache;
pub mod dnssec;
pub mod nameserver;
pub mod record_type_map;
pub mod resolver;
pub mod root_hints;
pub mod transport;

pub use cache::RecordCache;
pub use nameserver::NameServerAddress;
pub use resolver::RecursiveResolver;
