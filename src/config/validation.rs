//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges and formats (port, TTL, addresses)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;

/// Consul rejects session TTLs below ten seconds.
const MIN_SESSION_TTL_SECS: u64 = 10;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("port must not be 0")]
    ZeroPort,

    #[error("service_name must not be empty")]
    EmptyServiceName,

    #[error("routing.domain {0:?} must be a bare domain without scheme or leading dot")]
    InvalidDomain(String),

    #[error("routing.request_timeout_secs must be greater than 0")]
    ZeroRequestTimeout,

    #[error("election.session_ttl_secs must be at least {MIN_SESSION_TTL_SECS}, got {0}")]
    SessionTtlTooShort(u64),

    #[error("election.key_prefix must not be empty")]
    EmptyKeyPrefix,

    #[error("catalog.address {0:?} is not a valid URL")]
    InvalidCatalogAddress(String),

    #[error("log_level {0:?} is not one of trace, debug, info, warn, error")]
    UnknownLogLevel(String),
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.port == 0 {
        errors.push(ValidationError::ZeroPort);
    }
    if config.service_name.trim().is_empty() {
        errors.push(ValidationError::EmptyServiceName);
    }
    if let Some(domain) = &config.routing.domain {
        if !is_bare_domain(domain) {
            errors.push(ValidationError::InvalidDomain(domain.clone()));
        }
    }
    if config.routing.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroRequestTimeout);
    }
    if config.election.session_ttl_secs < MIN_SESSION_TTL_SECS {
        errors.push(ValidationError::SessionTtlTooShort(config.election.session_ttl_secs));
    }
    if config.election.key_prefix.is_empty() {
        errors.push(ValidationError::EmptyKeyPrefix);
    }
    if Url::parse(&config.catalog.address).is_err() {
        errors.push(ValidationError::InvalidCatalogAddress(config.catalog.address.clone()));
    }
    if !LOG_LEVELS.contains(&config.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::UnknownLogLevel(config.log_level.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_bare_domain(domain: &str) -> bool {
    !domain.is_empty()
        && !domain.starts_with('.')
        && !domain.contains("://")
        && !domain.contains('/')
        && !domain.chars().any(char::is_whitespace)
}
