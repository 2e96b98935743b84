//! Service name resolution.
//!
//! # Responsibilities
//! - Path mode: `/<service>/<rest>` forwards `/<rest>`
//! - Domain mode: `<service>.<domain>` forwards the path unchanged
//! - Preserve the query string in both modes

use axum::http::{header, Request};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("parse service name failed, invalid path {0:?}")]
    InvalidPath(String),

    #[error("parse service name failed, request has no host")]
    MissingHost,

    #[error("parse service name failed, host {host:?} is not under domain {domain:?}")]
    HostOutsideDomain { host: String, domain: String },
}

/// Where the service name is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressingMode {
    /// First path segment.
    Path,
    /// Host label(s) in front of this domain.
    Domain(String),
}

/// Result of resolving a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub service: String,
    /// Path plus query to send to the backend; always starts with `/`.
    pub path_and_query: String,
}

#[derive(Debug, Clone)]
pub struct ServiceResolver {
    mode: AddressingMode,
}

impl ServiceResolver {
    pub fn new(mode: AddressingMode) -> Self {
        let mode = match mode {
            AddressingMode::Domain(domain) => AddressingMode::Domain(domain.to_ascii_lowercase()),
            AddressingMode::Path => AddressingMode::Path,
        };
        Self { mode }
    }

    /// Domain addressing when a domain is configured, path addressing otherwise.
    pub fn from_domain(domain: Option<&str>) -> Self {
        match domain {
            Some(domain) => Self::new(AddressingMode::Domain(domain.to_string())),
            None => Self::new(AddressingMode::Path),
        }
    }

    pub fn mode(&self) -> &AddressingMode {
        &self.mode
    }

    pub fn resolve<B>(&self, request: &Request<B>) -> Result<ResolvedTarget, RoutingError> {
        let uri = request.uri();
        match &self.mode {
            AddressingMode::Path => resolve_path(uri.path(), uri.query()),
            AddressingMode::Domain(domain) => {
                let host = request
                    .headers()
                    .get(header::HOST)
                    .and_then(|value| value.to_str().ok())
                    .or_else(|| uri.authority().map(|authority| authority.as_str()))
                    .ok_or(RoutingError::MissingHost)?;
                let service = service_from_host(host, domain)?;
                Ok(ResolvedTarget {
                    service,
                    path_and_query: with_query(uri.path(), uri.query()),
                })
            }
        }
    }
}

fn resolve_path(path: &str, query: Option<&str>) -> Result<ResolvedTarget, RoutingError> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let (service, rest) = trimmed.split_once('/').unwrap_or((trimmed, ""));
    if service.is_empty() {
        return Err(RoutingError::InvalidPath(path.to_string()));
    }

    Ok(ResolvedTarget {
        service: service.to_string(),
        path_and_query: with_query(&format!("/{rest}"), query),
    })
}

fn service_from_host(host: &str, domain: &str) -> Result<String, RoutingError> {
    let name = strip_port(host).to_ascii_lowercase();
    let outside = || RoutingError::HostOutsideDomain { host: host.to_string(), domain: domain.to_string() };

    let service = name
        .strip_suffix(domain)
        .and_then(|prefix| prefix.strip_suffix('.'))
        .ok_or_else(outside)?;
    if service.is_empty() {
        return Err(outside());
    }
    Ok(service.to_string())
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !name.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

fn with_query(path: &str, query: Option<&str>) -> String {
    match query {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    }
}
