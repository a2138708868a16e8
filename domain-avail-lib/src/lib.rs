//! # Domain Avail Library
//!
//! A cascading resolver that answers "is this domain name available for
//! registration?" with one of four statuses.
//!
//! Each query is normalized, then answered from the result cache, an NS
//! lookup, or a WHOIS query, whichever settles it first. Definitive answers
//! are written back to the cache.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use domain_avail_lib::{AvailabilityChecker, CheckConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let checker = AvailabilityChecker::with_config(&CheckConfig::default())?;
//!     let resolution = checker.check("example.com").await;
//!
//!     println!("{}", resolution.reply()); // example.com:UNAVAILABLE
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Normalization**: IDNA (UTS #46) conversion and character validation
//! - **Result Cache**: In-process (moka) or shared (memcached) with TTL
//! - **DNS First**: A single NS lookup settles most registered names
//! - **WHOIS Fallback**: Per-TLD servers with IANA discovery for unknown TLDs

// Re-export main public API types and functions
pub use cache::{CacheBackend, MemoryCache, NoCache, ResultCache};
pub use checker::AvailabilityChecker;
pub use config::{
    load_env_config, load_env_config_from, parse_duration_string, ConfigManager, EnvConfig,
    FileConfig, LoadedConfig, ServerSettings, Settings, TlsFiles, DEFAULT_PROTOCOL,
};
pub use error::DomainAvailError;
pub use protocols::{DnsClient, DnsProbe, MemcachedCache, WhoisClient, WhoisProbe, WhoisSignals};
pub use types::{
    AvailabilityStatus, CacheBackendKind, CheckConfig, DnsOutcome, DomainQuery, Resolution,
    StatusSource, WhoisOutcome,
};
pub use utils::{extract_tld, normalize_domain, MIN_DOMAIN_LENGTH};

// Probers and wire codecs, public so callers can plug in their own
pub mod protocols;

// Internal modules - these are not part of the public API
mod cache;
mod checker;
mod config;
mod error;
mod types;
mod utils;

// Type alias for convenience
pub type Result<T> = std::result::Result<T, DomainAvailError>;

// Library version and metadata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");
