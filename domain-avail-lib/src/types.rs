//! Core data types for availability resolution.
//!
//! This module defines the status enumeration sent back to clients, the
//! normalized query value, the tagged prober outcomes and the runtime
//! configuration consumed by the pipeline.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::DomainAvailError;

/// Final classification of a query.
///
/// These four values are the only ones ever emitted on the wire, and the
/// textual form is also what the cache stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AvailabilityStatus {
    /// No registration found
    Available,
    /// Registered (delegated, or a substantive WHOIS record exists)
    Unavailable,
    /// Query rejected as malformed
    Invalid,
    /// Lookup infrastructure failed; the client may retry later
    ServFail,
}

impl AvailabilityStatus {
    /// Wire and cache representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Unavailable => "UNAVAILABLE",
            Self::Invalid => "INVALID",
            Self::ServFail => "SERVFAIL",
        }
    }

    /// Only definitive results describe the domain itself and may be cached.
    pub fn is_definitive(&self) -> bool {
        matches!(self, Self::Available | Self::Unavailable)
    }
}

impl fmt::Display for AvailabilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AvailabilityStatus {
    type Err = DomainAvailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "AVAILABLE" => Ok(Self::Available),
            "UNAVAILABLE" => Ok(Self::Unavailable),
            "INVALID" => Ok(Self::Invalid),
            "SERVFAIL" => Ok(Self::ServFail),
            other => Err(DomainAvailError::internal(format!(
                "Unknown availability status '{}'",
                other
            ))),
        }
    }
}

/// Which stage of the cascade produced a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
    /// Rejected by the normalizer
    Input,
    /// Served from the result cache
    Cache,
    /// Decided by the NS lookup
    Dns,
    /// Decided by the WHOIS response
    Whois,
}

impl fmt::Display for StatusSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusSource::Input => write!(f, "input"),
            StatusSource::Cache => write!(f, "cache"),
            StatusSource::Dns => write!(f, "dns"),
            StatusSource::Whois => write!(f, "whois"),
        }
    }
}

/// A query that passed normalization.
///
/// Only [`crate::normalize_domain`] constructs this, so `canonical` always
/// satisfies the length and character-class rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainQuery {
    raw: String,
    canonical: String,
}

impl DomainQuery {
    pub(crate) fn new(raw: String, canonical: String) -> Self {
        Self { raw, canonical }
    }

    /// The query exactly as the client sent it.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Lowercase ASCII form used as cache key and probe input.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }
}

/// Result of an authoritative-nameserver lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsOutcome {
    /// At least one NS record came back
    HasRecords(Vec<String>),
    /// The lookup succeeded with an empty answer
    NoRecords,
    /// NXDOMAIN, or no data for the NS type
    NotFound,
    /// The resolver refused the name itself
    Malformed,
    /// Resolver infrastructure failure or timeout
    ServerFailure,
    /// Any other resolver error
    Other(String),
}

/// Result of a WHOIS query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WhoisOutcome {
    /// Lower-cased free-text response body
    Success(String),
    /// The service declined to answer
    RateLimited,
    /// Connect, write, read failure or timeout
    TransportError(String),
}

/// Outcome of resolving one query, ready to be sent back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The query text as received
    pub query: String,
    /// Final status
    pub status: AvailabilityStatus,
    /// Cascade stage that decided the status
    pub source: StatusSource,
}

impl Resolution {
    /// Wire reply: `"<query-as-received>:<STATUS>"`.
    pub fn reply(&self) -> String {
        format!("{}:{}", self.query, self.status)
    }
}

/// Which result cache backend to run with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackendKind {
    /// Caching disabled
    None,
    /// In-process map bounded to `capacity` entries
    Memory { capacity: u64 },
    /// Shared memcached instance at `server` (`host:port`)
    Memcached { server: String },
}

/// Runtime configuration for the resolution pipeline.
#[derive(Debug, Clone)]
pub struct CheckConfig {
    /// Cache backend selection
    /// Default: in-memory, 100 000 entries
    pub cache_backend: CacheBackendKind,

    /// Lifetime of a cached definitive result
    /// Default: 1 hour
    pub cache_ttl: Duration,

    /// Upper bound on every cache get/set
    /// Default: 2 seconds
    pub cache_timeout: Duration,

    /// Upper bound on the NS lookup
    /// Default: 5 seconds
    pub dns_timeout: Duration,

    /// Upper bound on the whole WHOIS probe (discovery + query)
    /// Default: 10 seconds
    pub whois_timeout: Duration,

    /// TLD -> WHOIS host overrides on top of the built-in table
    pub whois_servers: HashMap<String, String>,

    /// Extra substrings meaning "not registered"
    pub available_signals: Vec<String>,

    /// Extra substrings meaning "the service refused to answer"
    pub rate_limit_signals: Vec<String>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            cache_backend: CacheBackendKind::Memory { capacity: 100_000 },
            cache_ttl: Duration::from_secs(3600),
            cache_timeout: Duration::from_secs(2),
            dns_timeout: Duration::from_secs(5),
            whois_timeout: Duration::from_secs(10),
            whois_servers: HashMap::new(),
            available_signals: Vec::new(),
            rate_limit_signals: Vec::new(),
        }
    }
}

impl CheckConfig {
    /// Select the cache backend.
    pub fn with_cache_backend(mut self, backend: CacheBackendKind) -> Self {
        self.cache_backend = backend;
        self
    }

    /// Reject settings that would make every probe or cache call fail.
    pub fn validate(&self) -> Result<(), DomainAvailError> {
        for (name, value) in [
            ("cache ttl", self.cache_ttl),
            ("cache timeout", self.cache_timeout),
            ("DNS timeout", self.dns_timeout),
            ("WHOIS timeout", self.whois_timeout),
        ] {
            if value.is_zero() {
                return Err(DomainAvailError::config(format!("{} must be positive", name)));
            }
        }

        match &self.cache_backend {
            CacheBackendKind::Memory { capacity: 0 } => Err(DomainAvailError::config(
                "Cache capacity must be at least 1",
            )),
            CacheBackendKind::Memcached { server } if server.trim().is_empty() => Err(
                DomainAvailError::config("Memcached server address cannot be empty"),
            ),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text_roundtrip() {
        for status in [
            AvailabilityStatus::Available,
            AvailabilityStatus::Unavailable,
            AvailabilityStatus::Invalid,
            AvailabilityStatus::ServFail,
        ] {
            assert_eq!(status.as_str().parse::<AvailabilityStatus>().unwrap(), status);
        }
        assert!("available".parse::<AvailabilityStatus>().is_err());
        assert!("".parse::<AvailabilityStatus>().is_err());
    }

    #[test]
    fn test_only_definitive_statuses_are_cacheable() {
        assert!(AvailabilityStatus::Available.is_definitive());
        assert!(AvailabilityStatus::Unavailable.is_definitive());
        assert!(!AvailabilityStatus::Invalid.is_definitive());
        assert!(!AvailabilityStatus::ServFail.is_definitive());
    }

    #[test]
    fn test_reply_echoes_raw_query() {
        let resolution = Resolution {
            query: "Bücher.DE".to_string(),
            status: AvailabilityStatus::Unavailable,
            source: StatusSource::Dns,
        };
        assert_eq!(resolution.reply(), "Bücher.DE:UNAVAILABLE");
    }

    #[test]
    fn test_default_config() {
        let config = CheckConfig::default();
        assert_eq!(config.cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.cache_timeout, Duration::from_secs(2));
        assert_eq!(
            config.cache_backend,
            CacheBackendKind::Memory { capacity: 100_000 }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unusable_settings() {
        let mut config = CheckConfig::default();
        config.whois_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let config = CheckConfig::default().with_cache_backend(CacheBackendKind::Memory { capacity: 0 });
        assert!(config.validate().is_err());

        let config = CheckConfig::default().with_cache_backend(CacheBackendKind::Memcached {
            server: " ".to_string(),
        });
        assert!(config.validate().is_err());
    }
}
