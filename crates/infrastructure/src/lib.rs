//! Boreal DNS Infrastructure Layer
//!
//! Concrete implementations behind the application ports: the response
//! cache, the recursive resolver engine, DNSSEC validation glue, name-server
//! addressing and the UDP/TCP transports.

pub mod dns;
