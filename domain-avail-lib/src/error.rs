//! Error handling for availability resolution.
//!
//! Errors never reach a connected client: the pipeline folds every failure
//! into one of the four statuses. This type exists for the places where a
//! failure has to be carried before that happens (probers, cache backends,
//! configuration loading, server startup).

use std::fmt;

/// Main error type for the library.
#[derive(Debug, Clone)]
pub enum DomainAvailError {
    /// Query failed normalization
    InvalidDomain { domain: String, reason: String },

    /// WHOIS transport or protocol errors
    WhoisError { domain: String, message: String },

    /// Cache backend unreachable or returned garbage
    CacheError { backend: String, message: String },

    /// Configuration errors (invalid settings, unparsable files, etc.)
    ConfigError { message: String },

    /// File I/O errors when reading configuration
    FileError { path: String, message: String },

    /// Timeout errors when operations take too long
    Timeout {
        operation: String,
        duration: std::time::Duration,
    },

    /// Generic internal errors that don't fit other categories
    Internal { message: String },
}

impl DomainAvailError {
    /// Create a new invalid domain error.
    pub fn invalid_domain<D: Into<String>, R: Into<String>>(domain: D, reason: R) -> Self {
        Self::InvalidDomain {
            domain: domain.into(),
            reason: reason.into(),
        }
    }

    /// Create a new WHOIS error.
    pub fn whois<D: Into<String>, M: Into<String>>(domain: D, message: M) -> Self {
        Self::WhoisError {
            domain: domain.into(),
            message: message.into(),
        }
    }

    /// Create a new cache backend error.
    pub fn cache<B: Into<String>, M: Into<String>>(backend: B, message: M) -> Self {
        Self::CacheError {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error.
    pub fn config<M: Into<String>>(message: M) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout<O: Into<String>>(operation: O, duration: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a new internal error.
    pub fn internal<M: Into<String>>(message: M) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a new file error.
    pub fn file_error<P: Into<String>, M: Into<String>>(path: P, message: M) -> Self {
        Self::FileError {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for DomainAvailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDomain { domain, reason } => {
                write!(f, "Invalid domain '{}': {}", domain, reason)
            }
            Self::WhoisError { domain, message } => {
                write!(f, "WHOIS error for '{}': {}", domain, message)
            }
            Self::CacheError { backend, message } => {
                write!(f, "Cache error ({}): {}", backend, message)
            }
            Self::ConfigError { message } => {
                write!(f, "Configuration error: {}", message)
            }
            Self::FileError { path, message } => {
                write!(f, "File error at '{}': {}", path, message)
            }
            Self::Timeout {
                operation,
                duration,
            } => {
                write!(f, "Timeout after {:?} during: {}", duration, operation)
            }
            Self::Internal { message } => {
                write!(f, "Internal error: {}", message)
            }
        }
    }
}

impl std::error::Error for DomainAvailError {}

impl From<toml::de::Error> for DomainAvailError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigError {
            message: format!("Failed to parse TOML configuration: {}", err),
        }
    }
}
