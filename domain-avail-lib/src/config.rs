//! Configuration file parsing and management.
//!
//! This module handles loading configuration from TOML files and `DA_*`
//! environment variables, and merging them with proper precedence rules:
//! built-in defaults < config files < environment < command line.

use crate::error::DomainAvailError;
use crate::types::{CacheBackendKind, CheckConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default WebSocket subprotocol negotiated with clients.
pub const DEFAULT_PROTOCOL: &str = "echo-protocol";

/// Configuration loaded from TOML files.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FileConfig {
    /// Listener and origin allow-list
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    /// Result cache backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheConfig>,

    /// Probe timeouts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookup: Option<LookupConfig>,

    /// WHOIS server overrides and extra signals
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whois: Option<WhoisConfig>,

    /// Log verbosity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Exact `Origin` header values allowed to connect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_origins: Option<Vec<String>>,

    /// WebSocket subprotocol
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    /// PEM certificate chain; serves `wss://` together with `tls_key`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_cert: Option<String>,

    /// PEM private key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_key: Option<String>,
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CacheConfig {
    /// `none`, `memory` or `memcached`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,

    /// Lifetime of cached results (e.g. "1h", "30m")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,

    /// Upper bound per cache operation (e.g. "2s")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// `host:port` of the memcached server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memcached_server: Option<String>,

    /// Maximum entries for the memory backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u64>,
}

/// `[lookup]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LookupConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_timeout: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub whois_timeout: Option<String>,
}

/// `[whois]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct WhoisConfig {
    /// TLD -> WHOIS host
    #[serde(skip_serializing_if = "Option::is_none")]
    pub servers: Option<HashMap<String, String>>,

    /// Extra phrases meaning "not registered"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_signals: Option<Vec<String>>,

    /// Extra phrases meaning "rate limited"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_signals: Option<Vec<String>>,
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LoggingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
}

/// A merged file configuration and the files it came from.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub config: FileConfig,
    /// Files that contributed, lowest precedence first
    pub sources: Vec<PathBuf>,
}

/// Configuration discovery and loading functionality.
pub struct ConfigManager;

impl ConfigManager {
    /// Create a new configuration manager.
    pub fn new() -> Self {
        Self
    }

    /// Load configuration from a specific file.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<FileConfig, DomainAvailError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(DomainAvailError::file_error(
                path.to_string_lossy(),
                "Configuration file not found",
            ));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            DomainAvailError::file_error(
                path.to_string_lossy(),
                format!("Failed to read configuration file: {}", e),
            )
        })?;

        let config: FileConfig = toml::from_str(&content)?;
        self.validate_config(&config)?;

        Ok(config)
    }

    /// Discover and load configuration files in precedence order.
    ///
    /// Unreadable or invalid discovered files are an error, since silently
    /// skipping them would start the server with settings nobody asked for.
    pub fn discover_and_load(&self) -> Result<LoadedConfig, DomainAvailError> {
        let mut loaded = LoadedConfig::default();

        let candidates = [
            self.get_xdg_config_path(),
            self.get_global_config_path(),
            self.get_local_config_path(),
        ];

        for path in candidates.into_iter().flatten() {
            let config = self.load_file(&path)?;
            loaded.config = self.merge_configs(loaded.config, config);
            loaded.sources.push(path);
        }

        Ok(loaded)
    }

    /// Get the local configuration file path.
    fn get_local_config_path(&self) -> Option<PathBuf> {
        let candidates = ["./domain-avail.toml", "./.domain-avail.toml"];

        for candidate in &candidates {
            let path = Path::new(candidate);
            if path.exists() {
                return Some(path.to_path_buf());
            }
        }

        None
    }

    /// Get the global configuration file path.
    fn get_global_config_path(&self) -> Option<PathBuf> {
        if let Some(home) = env::var_os("HOME") {
            let candidates = [".domain-avail.toml", "domain-avail.toml"];

            for candidate in &candidates {
                let path = Path::new(&home).join(candidate);
                if path.exists() {
                    return Some(path);
                }
            }
        }

        None
    }

    /// Get the XDG configuration file path.
    fn get_xdg_config_path(&self) -> Option<PathBuf> {
        let config_dir = env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| Path::new(&home).join(".config")))?;

        let path = config_dir.join("domain-avail").join("config.toml");
        if path.exists() {
            Some(path)
        } else {
            None
        }
    }

    /// Merge two configurations with proper precedence.
    ///
    /// Values from `higher` take precedence over values from `lower`.
    fn merge_configs(&self, lower: FileConfig, higher: FileConfig) -> FileConfig {
        FileConfig {
            server: match (lower.server, higher.server) {
                (Some(lower), Some(higher)) => Some(ServerConfig {
                    bind: higher.bind.or(lower.bind),
                    port: higher.port.or(lower.port),
                    allowed_origins: higher.allowed_origins.or(lower.allowed_origins),
                    protocol: higher.protocol.or(lower.protocol),
                    tls_cert: higher.tls_cert.or(lower.tls_cert),
                    tls_key: higher.tls_key.or(lower.tls_key),
                }),
                (lower, higher) => higher.or(lower),
            },
            cache: match (lower.cache, higher.cache) {
                (Some(lower), Some(higher)) => Some(CacheConfig {
                    backend: higher.backend.or(lower.backend),
                    ttl: higher.ttl.or(lower.ttl),
                    timeout: higher.timeout.or(lower.timeout),
                    memcached_server: higher.memcached_server.or(lower.memcached_server),
                    capacity: higher.capacity.or(lower.capacity),
                }),
                (lower, higher) => higher.or(lower),
            },
            lookup: match (lower.lookup, higher.lookup) {
                (Some(lower), Some(higher)) => Some(LookupConfig {
                    dns_timeout: higher.dns_timeout.or(lower.dns_timeout),
                    whois_timeout: higher.whois_timeout.or(lower.whois_timeout),
                }),
                (lower, higher) => higher.or(lower),
            },
            whois: match (lower.whois, higher.whois) {
                (Some(lower), Some(higher)) => Some(WhoisConfig {
                    // Server overrides merge, higher precedence wins for conflicts
                    servers: match (lower.servers, higher.servers) {
                        (Some(mut lower_servers), Some(higher_servers)) => {
                            lower_servers.extend(higher_servers);
                            Some(lower_servers)
                        }
                        (lower_servers, higher_servers) => higher_servers.or(lower_servers),
                    },
                    available_signals: higher.available_signals.or(lower.available_signals),
                    rate_limit_signals: higher.rate_limit_signals.or(lower.rate_limit_signals),
                }),
                (lower, higher) => higher.or(lower),
            },
            logging: match (lower.logging, higher.logging) {
                (Some(lower), Some(higher)) => Some(LoggingConfig {
                    debug: higher.debug.or(lower.debug),
                }),
                (lower, higher) => higher.or(lower),
            },
        }
    }

    /// Validate a configuration for common issues.
    fn validate_config(&self, config: &FileConfig) -> Result<(), DomainAvailError> {
        if let Some(server) = &config.server {
            if server.port == Some(0) {
                return Err(DomainAvailError::config("Port must be between 1 and 65535"));
            }
            if let Some(origins) = &server.allowed_origins {
                if origins.iter().any(|o| o.trim().is_empty()) {
                    return Err(DomainAvailError::config("Allowed origins cannot be empty strings"));
                }
            }
            if let Some(protocol) = &server.protocol {
                if protocol.trim().is_empty() || protocol.contains(' ') {
                    return Err(DomainAvailError::config(format!(
                        "Invalid WebSocket protocol '{}'",
                        protocol
                    )));
                }
            }
            for (field, value) in [("tls_cert", &server.tls_cert), ("tls_key", &server.tls_key)] {
                if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                    return Err(DomainAvailError::config(format!(
                        "server.{} cannot be an empty path",
                        field
                    )));
                }
            }
        }

        if let Some(cache) = &config.cache {
            if let Some(backend) = &cache.backend {
                if !["none", "memory", "memcached"].contains(&backend.as_str()) {
                    return Err(DomainAvailError::config(format!(
                        "Unknown cache backend '{}'. Use none, memory or memcached",
                        backend
                    )));
                }
            }
            validate_duration("cache.ttl", cache.ttl.as_deref())?;
            validate_duration("cache.timeout", cache.timeout.as_deref())?;
            if cache.capacity == Some(0) {
                return Err(DomainAvailError::config("Cache capacity must be at least 1"));
            }
        }

        if let Some(lookup) = &config.lookup {
            validate_duration("lookup.dns_timeout", lookup.dns_timeout.as_deref())?;
            validate_duration("lookup.whois_timeout", lookup.whois_timeout.as_deref())?;
        }

        if let Some(servers) = config.whois.as_ref().and_then(|w| w.servers.as_ref()) {
            for (tld, host) in servers {
                let label = tld.trim_start_matches('.');
                if label.is_empty() || label.contains('.') || label.contains(' ') {
                    return Err(DomainAvailError::config(format!(
                        "Invalid TLD '{}' in whois.servers",
                        tld
                    )));
                }
                if host.trim().is_empty() {
                    return Err(DomainAvailError::config(format!(
                        "Empty WHOIS server for TLD '{}'",
                        tld
                    )));
                }
            }
        }

        Ok(())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_duration(field: &str, value: Option<&str>) -> Result<(), DomainAvailError> {
    match value {
        Some(raw) if parse_duration_string(raw).is_none() => Err(DomainAvailError::config(format!(
            "Invalid duration '{}' for {}. Use format like '5s', '30m', '1h'",
            raw, field
        ))),
        _ => Ok(()),
    }
}

/// Environment variable configuration.
///
/// This represents configuration values that can be set via DA_* environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub allowed_origins: Option<Vec<String>>,
    pub cache_backend: Option<String>,
    pub cache_ttl: Option<String>,
    pub memcached_server: Option<String>,
    pub dns_timeout: Option<String>,
    pub whois_timeout: Option<String>,
    pub debug: Option<bool>,
    pub config: Option<String>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    /// Variables that were set but ignored, with the reason
    pub warnings: Vec<String>,
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn non_empty(val: String) -> Option<String> {
    let trimmed = val.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Load configuration from environment variables.
///
/// Parses all DA_* environment variables. Invalid values are ignored and
/// described in `EnvConfig::warnings` so they can be logged once logging is
/// up.
pub fn load_env_config() -> EnvConfig {
    load_env_config_from(|key| env::var(key).ok())
}

/// Same as [`load_env_config`] with a custom variable source.
pub fn load_env_config_from<F>(get: F) -> EnvConfig
where
    F: Fn(&str) -> Option<String>,
{
    let mut env_config = EnvConfig::default();

    env_config.bind = get("DA_BIND").and_then(non_empty);

    if let Some(val) = get("DA_PORT") {
        match val.trim().parse::<u16>() {
            Ok(port) if port > 0 => env_config.port = Some(port),
            _ => env_config
                .warnings
                .push(format!("Invalid DA_PORT='{}', must be 1-65535", val)),
        }
    }

    // DA_ALLOWED_ORIGINS - comma-separated origin list
    if let Some(val) = get("DA_ALLOWED_ORIGINS") {
        let origins: Vec<String> = val
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !origins.is_empty() {
            env_config.allowed_origins = Some(origins);
        }
    }

    if let Some(val) = get("DA_CACHE") {
        let backend = val.trim().to_lowercase();
        if ["none", "memory", "memcached"].contains(&backend.as_str()) {
            env_config.cache_backend = Some(backend);
        } else {
            env_config.warnings.push(format!(
                "Invalid DA_CACHE='{}', use none, memory or memcached",
                val
            ));
        }
    }

    env_config.memcached_server = get("DA_MEMCACHED_SERVER").and_then(non_empty);

    for (key, slot) in [
        ("DA_CACHE_TTL", &mut env_config.cache_ttl),
        ("DA_DNS_TIMEOUT", &mut env_config.dns_timeout),
        ("DA_WHOIS_TIMEOUT", &mut env_config.whois_timeout),
    ] {
        if let Some(val) = get(key) {
            if parse_duration_string(&val).is_some() {
                *slot = Some(val.trim().to_string());
            } else {
                env_config.warnings.push(format!(
                    "Invalid {}='{}', use format like '5s', '30m', '1h'",
                    key, val
                ));
            }
        }
    }

    if let Some(val) = get("DA_DEBUG") {
        match parse_bool(&val) {
            Some(debug) => env_config.debug = Some(debug),
            None => env_config
                .warnings
                .push(format!("Invalid DA_DEBUG='{}', use true/false", val)),
        }
    }

    env_config.config = get("DA_CONFIG").and_then(non_empty);
    env_config.tls_cert = get("DA_TLS_CERT").and_then(non_empty);
    env_config.tls_key = get("DA_TLS_KEY").and_then(non_empty);

    env_config
}

/// Fully resolved listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub bind: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub protocol: String,
    /// `None` serves plain `ws://`
    pub tls: Option<TlsFiles>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: Vec::new(),
            protocol: DEFAULT_PROTOCOL.to_string(),
            tls: None,
        }
    }
}

/// Certificate chain and private key for serving `wss://`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TlsFiles {
    /// Both paths or neither. A lone certificate or key is a configuration error.
    pub fn pair(
        cert: Option<PathBuf>,
        key: Option<PathBuf>,
    ) -> Result<Option<Self>, DomainAvailError> {
        match (cert, key) {
            (Some(cert), Some(key)) => Ok(Some(Self { cert, key })),
            (None, None) => Ok(None),
            (Some(_), None) => Err(DomainAvailError::config(
                "TLS certificate given without a private key",
            )),
            (None, Some(_)) => Err(DomainAvailError::config(
                "TLS private key given without a certificate",
            )),
        }
    }
}

/// Everything the server needs after files and environment are merged.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub check: CheckConfig,
    pub debug: bool,
}

impl Settings {
    /// Apply `file` and then `env` on top of the defaults.
    pub fn resolve(file: FileConfig, env: &EnvConfig) -> Result<Self, DomainAvailError> {
        let mut server = ServerSettings::default();
        let mut check = CheckConfig::default();

        let server_file = file.server.unwrap_or_default();
        let cache_file = file.cache.unwrap_or_default();
        let lookup_file = file.lookup.unwrap_or_default();
        let whois_file = file.whois.unwrap_or_default();

        if let Some(bind) = env.bind.clone().or(server_file.bind) {
            server.bind = bind;
        }
        if let Some(port) = env.port.or(server_file.port) {
            server.port = port;
        }
        if let Some(origins) = env.allowed_origins.clone().or(server_file.allowed_origins) {
            server.allowed_origins = origins;
        }
        if let Some(protocol) = server_file.protocol {
            server.protocol = protocol;
        }
        server.tls = TlsFiles::pair(
            env.tls_cert.clone().or(server_file.tls_cert).map(PathBuf::from),
            env.tls_key.clone().or(server_file.tls_key).map(PathBuf::from),
        )?;

        let backend = env
            .cache_backend
            .clone()
            .or(cache_file.backend)
            .unwrap_or_else(|| "memory".to_string());
        check.cache_backend = match backend.as_str() {
            "none" => CacheBackendKind::None,
            "memory" => CacheBackendKind::Memory {
                capacity: cache_file.capacity.unwrap_or(100_000),
            },
            "memcached" => CacheBackendKind::Memcached {
                server: env
                    .memcached_server
                    .clone()
                    .or(cache_file.memcached_server)
                    .unwrap_or_else(|| "127.0.0.1:11211".to_string()),
            },
            other => {
                return Err(DomainAvailError::config(format!(
                    "Unknown cache backend '{}'",
                    other
                )))
            }
        };

        if let Some(ttl) = env.cache_ttl.as_deref().or(cache_file.ttl.as_deref()) {
            check.cache_ttl = require_duration("cache ttl", ttl)?;
        }
        if let Some(timeout) = cache_file.timeout.as_deref() {
            check.cache_timeout = require_duration("cache timeout", timeout)?;
        }
        if let Some(timeout) = env.dns_timeout.as_deref().or(lookup_file.dns_timeout.as_deref()) {
            check.dns_timeout = require_duration("DNS timeout", timeout)?;
        }
        if let Some(timeout) = env
            .whois_timeout
            .as_deref()
            .or(lookup_file.whois_timeout.as_deref())
        {
            check.whois_timeout = require_duration("WHOIS timeout", timeout)?;
        }

        check.whois_servers = whois_file.servers.unwrap_or_default();
        check.available_signals = whois_file.available_signals.unwrap_or_default();
        check.rate_limit_signals = whois_file.rate_limit_signals.unwrap_or_default();

        let debug = env
            .debug
            .or(file.logging.and_then(|l| l.debug))
            .unwrap_or(false);

        Ok(Self {
            server,
            check,
            debug,
        })
    }
}

fn require_duration(what: &str, raw: &str) -> Result<Duration, DomainAvailError> {
    match parse_duration_string(raw) {
        Some(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(DomainAvailError::config(format!(
            "Invalid {} '{}', must be a positive duration like '5s', '30m', '1h'",
            what, raw
        ))),
    }
}

/// Parse a duration string like "5s", "30m", "1h" into seconds.
///
/// A bare number is taken as seconds.
pub fn parse_duration_string(value: &str) -> Option<u64> {
    let value = value.trim().to_lowercase();

    if let Some(secs) = value.strip_suffix('s') {
        secs.parse::<u64>().ok()
    } else if let Some(mins) = value.strip_suffix('m') {
        mins.parse::<u64>().ok().and_then(|m| m.checked_mul(60))
    } else if let Some(hours) = value.strip_suffix('h') {
        hours.parse::<u64>().ok().and_then(|h| h.checked_mul(3600))
    } else {
        value.parse::<u64>().ok()
    }
}
