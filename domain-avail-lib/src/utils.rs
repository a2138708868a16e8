//! Utility functions for domain processing and validation.
//!
//! This module contains the query normalizer and small helpers used by the
//! probers. Nothing here touches the network or the cache.

use crate::error::DomainAvailError;
use crate::types::DomainQuery;
use regex::Regex;

/// Shortest canonical name the pipeline will probe.
pub const MIN_DOMAIN_LENGTH: usize = 3;

lazy_static::lazy_static! {
    static ref DISALLOWED_CHARS: Regex = Regex::new(r"(?i)[^a-z0-9\-.]").unwrap();
}

/// Validate and canonicalize a raw query.
///
/// Unicode labels are converted to their ASCII-compatible (punycode) form,
/// one trailing root dot is dropped and the result is lower-cased. The query is rejected when the converted name
/// is empty, shorter than [`MIN_DOMAIN_LENGTH`], or contains anything outside
/// `[a-z0-9-.]`.
///
/// # Arguments
///
/// * `raw` - The query text exactly as received
///
/// # Returns
///
/// A `DomainQuery` carrying both forms, or `Err(DomainAvailError::InvalidDomain)`.
pub fn normalize_domain(raw: &str) -> Result<DomainQuery, DomainAvailError> {
    let ascii = idna::domain_to_ascii(raw)
        .map_err(|e| DomainAvailError::invalid_domain(raw, format!("IDNA conversion failed: {:?}", e)))?;
    // The root label is implied, so `example.com.` and `example.com` are one name
    let canonical = ascii.strip_suffix('.').unwrap_or(&ascii).to_lowercase();

    if canonical.is_empty() {
        return Err(DomainAvailError::invalid_domain(
            raw,
            "Domain name cannot be empty",
        ));
    }

    if canonical.len() < MIN_DOMAIN_LENGTH {
        return Err(DomainAvailError::invalid_domain(raw, "Domain name too short"));
    }

    if DISALLOWED_CHARS.is_match(&canonical) {
        return Err(DomainAvailError::invalid_domain(
            raw,
            "Domain name contains characters outside [a-z0-9-.]",
        ));
    }

    Ok(DomainQuery::new(raw.to_string(), canonical))
}

/// Extract the last label of a domain, used to pick a WHOIS server.
///
/// Handles trailing dots (`example.com.` -> `com`).
pub fn extract_tld(domain: &str) -> Result<String, DomainAvailError> {
    let trimmed = domain.trim_end_matches('.');
    let parts: Vec<&str> = trimmed.split('.').collect();

    if parts.len() < 2 || parts.iter().any(|p| p.is_empty()) {
        return Err(DomainAvailError::invalid_domain(
            domain,
            "Domain must contain at least one dot",
        ));
    }

    Ok(parts[parts.len() - 1].to_lowercase())
}
