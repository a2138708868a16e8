//! WHOIS protocol implementation for domain availability checking.
//!
//! WHOIS is only consulted when DNS could not find the name. It returns free
//! text with no shared schema across registries, so classification is a
//! case-insensitive substring scan against two signal lists kept as data.

use crate::error::DomainAvailError;
use crate::protocols::servers::{WhoisServer, WhoisServers, IANA_WHOIS_SERVER};
use crate::types::{AvailabilityStatus, WhoisOutcome};
use crate::utils::extract_tld;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Standard WHOIS port.
pub const WHOIS_PORT: u16 = 43;

/// Responses are cut off beyond this many bytes.
const MAX_RESPONSE_BYTES: u64 = 1024 * 1024;

/// Phrases meaning the WHOIS service refused to answer.
pub const RATE_LIMIT_SIGNALS: &[&str] = &[
    "whois limit exceeded",
    "request is being rate limited",
    "quota exceeded",
    "rate limit exceeded",
    "too many requests",
    "limit exceeded",
    "rate-limited",
];

/// Phrases meaning the registry holds no record for the name.
pub const NOT_REGISTERED_SIGNALS: &[&str] = &[
    "domain not found",
    "no match for",
    "not found",
    "status: available",
    "no domain exists",
    "no data found",
    "domain status: no object found",
    "object does not exist",
    "domain status: free",
    "domain name has not been registered",
    "no entries found",
    "not registered",
    "no matching record",
];

/// The two substring lists used to read a WHOIS body.
#[derive(Debug, Clone)]
pub struct WhoisSignals {
    rate_limited: Vec<String>,
    not_registered: Vec<String>,
}

impl WhoisSignals {
    /// The built-in lists extended with caller-supplied phrases.
    pub fn with_extra(extra_not_registered: &[String], extra_rate_limited: &[String]) -> Self {
        let mut signals = Self::default();
        signals
            .not_registered
            .extend(extra_not_registered.iter().map(|s| s.to_lowercase()));
        signals
            .rate_limited
            .extend(extra_rate_limited.iter().map(|s| s.to_lowercase()));
        signals
    }

    /// Whether the body says the service throttled us.
    pub fn is_rate_limited(&self, body: &str) -> bool {
        let body = body.to_lowercase();
        self.rate_limited.iter().any(|s| body.contains(s.as_str()))
    }

    /// Whether the body says no registration exists.
    pub fn is_not_registered(&self, body: &str) -> bool {
        let body = body.to_lowercase();
        self.not_registered.iter().any(|s| body.contains(s.as_str()))
    }

    /// Status for a successful WHOIS body.
    ///
    /// A rate-limit phrase wins over any not-registered phrase.
    pub fn verdict(&self, body: &str) -> AvailabilityStatus {
        if self.is_rate_limited(body) {
            AvailabilityStatus::ServFail
        } else if self.is_not_registered(body) {
            AvailabilityStatus::Available
        } else {
            AvailabilityStatus::Unavailable
        }
    }
}

impl Default for WhoisSignals {
    fn default() -> Self {
        Self {
            rate_limited: RATE_LIMIT_SIGNALS.iter().map(|s| s.to_string()).collect(),
            not_registered: NOT_REGISTERED_SIGNALS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Anything that can answer a WHOIS query for a canonical domain.
#[async_trait]
pub trait WhoisProbe: Send + Sync {
    /// Query once, without following registrar referrals.
    async fn probe(&self, domain: &str) -> WhoisOutcome;
}

/// WHOIS client speaking the protocol directly over TCP.
#[derive(Clone)]
pub struct WhoisClient {
    /// Timeout for the whole probe, referral discovery included
    timeout: Duration,
    /// Known TLD servers
    servers: WhoisServers,
    /// Phrases used to spot throttling
    signals: Arc<WhoisSignals>,
    /// Port to connect to (43 outside of tests)
    port: u16,
}

impl WhoisClient {
    /// Create a new WHOIS client with default settings.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(10))
    }

    /// Create a new WHOIS client with custom timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            servers: WhoisServers::builtin(),
            signals: Arc::new(WhoisSignals::default()),
            port: WHOIS_PORT,
        }
    }

    /// Use a different server table.
    pub fn with_servers(mut self, servers: WhoisServers) -> Self {
        self.servers = servers;
        self
    }

    /// Use a different signal set.
    pub fn with_signals(mut self, signals: Arc<WhoisSignals>) -> Self {
        self.signals = signals;
        self
    }

    /// Pick the server for `domain`, asking IANA when the TLD is not known.
    async fn server_for(&self, domain: &str) -> Result<WhoisServer, DomainAvailError> {
        let tld = extract_tld(domain)?;

        if let Some(server) = self.servers.lookup(&tld) {
            return Ok(server.clone());
        }

        debug!(tld = %tld, "no built-in WHOIS server, asking IANA");
        let response = self.query(IANA_WHOIS_SERVER, &tld).await?;
        parse_iana_refer_response(&response)
            .map(WhoisServer::plain)
            .ok_or_else(|| DomainAvailError::whois(domain, format!("No WHOIS server known for .{}", tld)))
    }

    async fn query(&self, host: &str, line: &str) -> Result<String, DomainAvailError> {
        let stream = TcpStream::connect((host, self.port)).await.map_err(|e| {
            DomainAvailError::whois(line, format!("Failed to connect to {}: {}", host, e))
        })?;
        query_whois(stream, line)
            .await
            .map_err(|e| DomainAvailError::whois(line, format!("Query to {} failed: {}", host, e)))
    }

    async fn lookup(&self, domain: &str) -> Result<String, DomainAvailError> {
        let server = self.server_for(domain).await?;
        debug!(domain, server = %server.host, "querying WHOIS");
        self.query(&server.host, &server.query_for(domain)).await
    }
}

impl Default for WhoisClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WhoisProbe for WhoisClient {
    async fn probe(&self, domain: &str) -> WhoisOutcome {
        match tokio::time::timeout(self.timeout, self.lookup(domain)).await {
            Ok(Ok(body)) => {
                let body = body.to_lowercase();
                if self.signals.is_rate_limited(&body) {
                    warn!(domain, response = %body.trim(), "WHOIS request was rate limited");
                    WhoisOutcome::RateLimited
                } else {
                    WhoisOutcome::Success(body)
                }
            }
            Ok(Err(e)) => {
                warn!(domain, error = %e, "WHOIS query failed");
                WhoisOutcome::TransportError(e.to_string())
            }
            Err(_) => {
                let e = DomainAvailError::timeout("WHOIS query", self.timeout);
                warn!(domain, error = %e, "WHOIS query timed out");
                WhoisOutcome::TransportError(e.to_string())
            }
        }
    }
}

/// Send one query line and read the response until the server closes.
pub(crate) async fn query_whois<S>(mut stream: S, line: &str) -> std::io::Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(format!("{}\r\n", line).as_bytes()).await?;
    stream.flush().await?;

    let mut buf = Vec::new();
    (&mut stream)
        .take(MAX_RESPONSE_BYTES)
        .read_to_end(&mut buf)
        .await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Parse an IANA WHOIS response for the authoritative WHOIS server.
///
/// The IANA WHOIS response may use either `refer:` or `whois:` to indicate
/// the authoritative WHOIS server for a TLD. We check both fields, preferring
/// `refer:` when present.
///
/// ```text
/// whois:        whois.verisign-grs.com
/// refer:        whois.verisign-grs.com
/// ```
fn parse_iana_refer_response(response: &str) -> Option<String> {
    let mut whois_server = None;

    for line in response.lines() {
        let line_trimmed = line.trim();
        if let Some(server) = line_trimmed.strip_prefix("refer:") {
            let server = server.trim();
            if !server.is_empty() {
                return Some(server.to_string());
            }
        } else if let Some(server) = line_trimmed.strip_prefix("whois:") {
            let server = server.trim();
            if !server.is_empty() {
                whois_server = Some(server.to_string());
            }
        }
    }

    whois_server
}
