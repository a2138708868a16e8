//! Resolution pipeline.
//!
//! This module provides the `AvailabilityChecker` that turns one raw query
//! into exactly one status by walking a fixed cascade:
//!
//! ```text
//! normalize ─ invalid ──────────────────────────────► INVALID
//!     │
//! cache ───── hit ──────────────────────────────────► cached status
//!     │ miss
//! dns ─────── HasRecords / NoRecords / Other ───────► UNAVAILABLE (cached)
//!     │       Malformed ────────────────────────────► INVALID
//!     │       ServerFailure ────────────────────────► SERVFAIL
//!     │ NotFound
//! whois ───── rate limited / transport error ───────► SERVFAIL
//!             not-registered signal ────────────────► AVAILABLE (cached)
//!             anything else ────────────────────────► UNAVAILABLE (cached)
//! ```

use crate::cache::ResultCache;
use crate::error::DomainAvailError;
use crate::protocols::{DnsClient, DnsProbe, WhoisClient, WhoisProbe, WhoisServers, WhoisSignals};
use crate::types::{AvailabilityStatus, CheckConfig, DnsOutcome, Resolution, StatusSource, WhoisOutcome};
use crate::utils::normalize_domain;
use std::sync::Arc;
use tracing::debug;

/// Main checker that coordinates the cache and both probers.
///
/// One checker is shared by every connection. It holds no per-query state,
/// so any number of `check` calls may run concurrently.
///
/// # Example
///
/// ```rust,no_run
/// use domain_avail_lib::{AvailabilityChecker, CheckConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let checker = AvailabilityChecker::with_config(&CheckConfig::default())?;
///     let resolution = checker.check("example.com").await;
///     println!("{}", resolution.reply()); // example.com:UNAVAILABLE
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct AvailabilityChecker {
    /// Result cache shared across queries
    cache: ResultCache,
    /// NS prober
    dns: Arc<dyn DnsProbe>,
    /// WHOIS prober, consulted only when DNS finds nothing
    whois: Arc<dyn WhoisProbe>,
    /// Phrases used to read WHOIS bodies
    signals: Arc<WhoisSignals>,
}

impl AvailabilityChecker {
    /// Create a checker with the real cache backend and probers from `config`.
    ///
    /// # Errors
    ///
    /// Returns `DomainAvailError` if `config` has zero timeouts or an
    /// unusable cache backend.
    pub fn with_config(config: &CheckConfig) -> Result<Self, DomainAvailError> {
        config.validate()?;

        let signals = Arc::new(WhoisSignals::with_extra(
            &config.available_signals,
            &config.rate_limit_signals,
        ));
        let dns = DnsClient::from_system_conf(config.dns_timeout);
        let whois = WhoisClient::with_timeout(config.whois_timeout)
            .with_servers(WhoisServers::with_overrides(&config.whois_servers))
            .with_signals(signals.clone());

        Ok(Self::from_parts(
            ResultCache::from_config(config),
            Arc::new(dns),
            Arc::new(whois),
            signals,
        ))
    }

    /// Assemble a checker from explicit components.
    pub fn from_parts(
        cache: ResultCache,
        dns: Arc<dyn DnsProbe>,
        whois: Arc<dyn WhoisProbe>,
        signals: Arc<WhoisSignals>,
    ) -> Self {
        Self {
            cache,
            dns,
            whois,
            signals,
        }
    }

    /// The result cache in use.
    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Resolve one raw query.
    ///
    /// Never fails: every path ends in one of the four statuses. Definitive
    /// results are written to the cache before this returns.
    pub async fn check(&self, raw: &str) -> Resolution {
        let query = match normalize_domain(raw) {
            Ok(query) => query,
            Err(e) => {
                debug!(query = raw, error = %e, "rejected query");
                return Resolution {
                    query: raw.to_string(),
                    status: AvailabilityStatus::Invalid,
                    source: StatusSource::Input,
                };
            }
        };
        let domain = query.canonical();

        if let Some(status) = self.cache.get(domain).await {
            return Resolution {
                query: raw.to_string(),
                status,
                source: StatusSource::Cache,
            };
        }

        let (status, source) = self.resolve_uncached(domain).await;

        if status.is_definitive() {
            self.cache.put(domain, status).await;
        }

        Resolution {
            query: raw.to_string(),
            status,
            source,
        }
    }

    /// DNS first, WHOIS only when DNS found nothing.
    async fn resolve_uncached(&self, domain: &str) -> (AvailabilityStatus, StatusSource) {
        match self.dns.probe(domain).await {
            DnsOutcome::HasRecords(_) | DnsOutcome::NoRecords => {
                (AvailabilityStatus::Unavailable, StatusSource::Dns)
            }
            DnsOutcome::Other(detail) => {
                debug!(domain, detail = %detail, "unclassified resolver error, treating as registered");
                (AvailabilityStatus::Unavailable, StatusSource::Dns)
            }
            DnsOutcome::Malformed => {
                debug!(domain, "domain is invalid per DNS query");
                (AvailabilityStatus::Invalid, StatusSource::Dns)
            }
            DnsOutcome::ServerFailure => (AvailabilityStatus::ServFail, StatusSource::Dns),
            DnsOutcome::NotFound => (self.resolve_whois(domain).await, StatusSource::Whois),
        }
    }

    async fn resolve_whois(&self, domain: &str) -> AvailabilityStatus {
        match self.whois.probe(domain).await {
            WhoisOutcome::Success(body) => {
                let status = self.signals.verdict(&body);
                debug!(domain, %status, "classified WHOIS response");
                status
            }
            WhoisOutcome::RateLimited | WhoisOutcome::TransportError(_) => {
                AvailabilityStatus::ServFail
            }
        }
    }
}
