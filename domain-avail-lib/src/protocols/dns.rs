//! Nameserver (NS) probing over the host's resolver configuration.
//!
//! A delegated domain has NS records, so this single cheap lookup settles
//! most queries before WHOIS is ever touched.

use crate::types::DnsOutcome;
use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::{Name, TokioAsyncResolver};
use std::time::Duration;
use tracing::{debug, warn};

/// Anything that can tell whether a canonical domain is delegated.
#[async_trait]
pub trait DnsProbe: Send + Sync {
    /// Look up NS records; never waits longer than the prober's timeout.
    async fn probe(&self, domain: &str) -> DnsOutcome;
}

/// NS prober backed by `hickory-resolver`.
#[derive(Clone)]
pub struct DnsClient {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl DnsClient {
    /// Build a prober from the system resolver configuration.
    ///
    /// Falls back to the library's default upstreams when the system
    /// configuration cannot be read.
    pub fn from_system_conf(timeout: Duration) -> Self {
        let (config, mut opts) = match hickory_resolver::system_conf::read_system_conf() {
            Ok(conf) => conf,
            Err(e) => {
                warn!(error = %e, "could not read system resolver configuration, using defaults");
                (ResolverConfig::default(), ResolverOpts::default())
            }
        };
        opts.timeout = timeout;
        Self::with_config(config, opts, timeout)
    }

    /// Build a prober with explicit resolver settings.
    pub fn with_config(config: ResolverConfig, opts: ResolverOpts, timeout: Duration) -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
            timeout,
        }
    }

    async fn lookup(&self, name: Name) -> DnsOutcome {
        match self.resolver.ns_lookup(name).await {
            Ok(lookup) => {
                let records: Vec<String> = lookup.iter().map(|ns| ns.to_string()).collect();
                if records.is_empty() {
                    DnsOutcome::NoRecords
                } else {
                    DnsOutcome::HasRecords(records)
                }
            }
            Err(e) => outcome_for_error(&e),
        }
    }
}

#[async_trait]
impl DnsProbe for DnsClient {
    async fn probe(&self, domain: &str) -> DnsOutcome {
        let mut name = match Name::from_ascii(domain) {
            Ok(name) => name,
            Err(e) => {
                debug!(domain, error = %e, "resolver rejected domain name");
                return DnsOutcome::Malformed;
            }
        };
        // Absolute name: search domains must never be appended
        name.set_fqdn(true);

        let outcome = match tokio::time::timeout(self.timeout, self.lookup(name)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(domain, timeout = ?self.timeout, "NS lookup timed out");
                DnsOutcome::ServerFailure
            }
        };
        debug!(domain, ?outcome, "NS lookup finished");
        outcome
    }
}

/// Map a resolver error onto the outcome taxonomy.
///
/// Transport and wire-level failures say nothing about the name, so every
/// proto error is a server failure.
pub(crate) fn outcome_for_error(err: &ResolveError) -> DnsOutcome {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. } => {
            outcome_for_response_code(*response_code)
        }
        ResolveErrorKind::Timeout
        | ResolveErrorKind::NoConnections
        | ResolveErrorKind::Io(_)
        | ResolveErrorKind::Proto(_) => DnsOutcome::ServerFailure,
        _ => DnsOutcome::Other(err.to_string()),
    }
}

/// Map the response code of an empty answer onto the outcome taxonomy.
pub(crate) fn outcome_for_response_code(code: ResponseCode) -> DnsOutcome {
    match code {
        ResponseCode::NXDomain | ResponseCode::NoError => DnsOutcome::NotFound,
        ResponseCode::ServFail => DnsOutcome::ServerFailure,
        other => DnsOutcome::Other(format!("resolver answered {}", other)),
    }
}
