//! Result cache for resolved availability statuses.
//!
//! The cache is an optimization only. Every backend failure is logged here
//! and reported to the pipeline as a miss, so an unreachable cache costs
//! latency and never changes an answer.

use crate::error::DomainAvailError;
use crate::protocols::MemcachedCache;
use crate::types::{AvailabilityStatus, CacheBackendKind, CheckConfig};
use async_trait::async_trait;
use moka::Expiry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Raw key/value store behind the result cache.
///
/// Implementations synchronize internally; the pipeline shares one backend
/// across every in-flight query.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend name used in log lines.
    fn name(&self) -> &'static str;

    /// Fetch a stored value, `Ok(None)` on miss or expiry.
    async fn get(&self, key: &str) -> Result<Option<String>, DomainAvailError>;

    /// Store a value that expires after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), DomainAvailError>;
}

/// Backend used when caching is disabled: always misses, never stores.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

#[async_trait]
impl CacheBackend for NoCache {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, DomainAvailError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), DomainAvailError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CachedValue {
    value: String,
    ttl: Duration,
}

/// Expiry policy that lets every entry carry the TTL it was stored with.
struct PerEntryTtl;

impl Expiry<String, CachedValue> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process backend, bounded in size, with expiry enforced by moka.
#[derive(Clone)]
pub struct MemoryCache {
    entries: moka::future::Cache<String, CachedValue>,
}

impl MemoryCache {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: u64) -> Self {
        let entries = moka::future::Cache::builder()
            .max_capacity(capacity)
            .expire_after(PerEntryTtl)
            .build();
        Self { entries }
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, DomainAvailError> {
        Ok(self.entries.get(key).await.map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), DomainAvailError> {
        self.entries
            .insert(
                key.to_string(),
                CachedValue {
                    value: value.to_string(),
                    ttl,
                },
            )
            .await;
        Ok(())
    }
}

/// The cache as seen by the pipeline.
///
/// Stores only definitive statuses, bounds every backend call by a timeout,
/// and never returns an error.
#[derive(Clone)]
pub struct ResultCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    timeout: Duration,
}

impl ResultCache {
    /// Wrap a backend.
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration, timeout: Duration) -> Self {
        Self {
            backend,
            ttl,
            timeout,
        }
    }

    /// A cache that never holds anything.
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoCache), Duration::from_secs(3600), Duration::from_secs(2))
    }

    /// Build the backend selected in `config`.
    pub fn from_config(config: &CheckConfig) -> Self {
        let backend: Arc<dyn CacheBackend> = match &config.cache_backend {
            CacheBackendKind::None => Arc::new(NoCache),
            CacheBackendKind::Memory { capacity } => Arc::new(MemoryCache::new(*capacity)),
            CacheBackendKind::Memcached { server } => Arc::new(MemcachedCache::new(server.clone())),
        };
        Self::new(backend, config.cache_ttl, config.cache_timeout)
    }

    /// Name of the active backend.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Look up a previously stored status.
    ///
    /// Backend errors, timeouts and stored values that are not a definitive
    /// status all count as a miss.
    pub async fn get(&self, domain: &str) -> Option<AvailabilityStatus> {
        let result = tokio::time::timeout(self.timeout, self.backend.get(domain)).await;

        let raw = match result {
            Ok(Ok(Some(raw))) => raw,
            Ok(Ok(None)) => {
                debug!(domain, backend = self.backend.name(), "cache miss");
                return None;
            }
            Ok(Err(e)) => {
                warn!(domain, backend = self.backend.name(), error = %e, "cache lookup failed");
                return None;
            }
            Err(_) => {
                warn!(domain, backend = self.backend.name(), timeout = ?self.timeout, "cache lookup timed out");
                return None;
            }
        };

        match raw.parse::<AvailabilityStatus>() {
            Ok(status) if status.is_definitive() => {
                debug!(domain, %status, backend = self.backend.name(), "cache hit");
                Some(status)
            }
            _ => {
                warn!(domain, value = %raw, backend = self.backend.name(), "ignoring unusable cached value");
                None
            }
        }
    }

    /// Store a status with the standard TTL.
    ///
    /// `INVALID` and `SERVFAIL` are dropped without touching the backend.
    pub async fn put(&self, domain: &str, status: AvailabilityStatus) {
        if !status.is_definitive() {
            debug!(domain, %status, "not caching non-definitive status");
            return;
        }

        let result = tokio::time::timeout(
            self.timeout,
            self.backend.set(domain, status.as_str(), self.ttl),
        )
        .await;

        match result {
            Ok(Ok(())) => {
                debug!(domain, %status, backend = self.backend.name(), "cached status");
            }
            Ok(Err(e)) => {
                warn!(domain, %status, backend = self.backend.name(), error = %e, "cache insert failed");
            }
            Err(_) => {
                warn!(domain, %status, backend = self.backend.name(), timeout = ?self.timeout, "cache insert timed out");
            }
        }
    }
}
