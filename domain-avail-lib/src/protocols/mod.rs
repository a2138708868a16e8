//! Protocol implementations used by the resolution pipeline.
//!
//! This module contains the DNS and WHOIS probers and the memcached
//! wire codec behind the shared result cache.

/// NS lookups through hickory-resolver
pub mod dns;

/// Memcached ASCII protocol backend
pub mod memcached;

/// TLD to WHOIS server table
pub mod servers;

/// WHOIS protocol implementation
pub mod whois;

// Re-export commonly used types
pub use dns::{DnsClient, DnsProbe};
pub use memcached::MemcachedCache;
pub use servers::{get_whois_server_map, WhoisServer, WhoisServers};
pub use whois::{WhoisClient, WhoisProbe, WhoisSignals};
