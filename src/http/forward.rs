//! Upstream forwarding.
//!
//! # Responsibilities
//! - Rewrite the request onto `{scheme}://{endpoint}{path}`
//! - Strip hop-by-hop headers both ways, add `X-Forwarded-*`
//! - Stream bodies without buffering
//! - Record round trip metrics
//!
//! # Design Decisions
//! - One pooled client per process; with keep-alives disabled the pool
//!   holds no idle connections and every request asks for `Connection: close`
//! - Redirects are passed back to the client, never followed

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, Response};
use thiserror::Error;
use url::Url;

use crate::config::{RoutingConfig, Scheme};
use crate::http::request::RequestIdExt;
use crate::observability::metrics;
use crate::routing::ResolvedTarget;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid upstream url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

pub struct Forwarder {
    client: reqwest::Client,
    scheme: Scheme,
    disable_keep_alives: bool,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(config: &RoutingConfig) -> Result<Self, ForwardError> {
        let idle_per_host = if config.disable_keep_alives {
            0
        } else {
            config.max_idle_conns_per_host
        };

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(idle_per_host)
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(CONNECT_TIMEOUT)
            .no_proxy()
            .build()?;

        Ok(Self {
            client,
            scheme: config.scheme,
            disable_keep_alives: config.disable_keep_alives,
            timeout: config.request_timeout(),
        })
    }

    pub fn upstream_url(&self, endpoint: &str, path_and_query: &str) -> Result<Url, ForwardError> {
        let url = format!("{}://{}{}", self.scheme, endpoint, path_and_query);
        Url::parse(&url).map_err(|source| ForwardError::InvalidUrl { url, source })
    }

    /// Send `request` to `endpoint` and hand back the backend's response.
    ///
    /// Any status the backend returns is a success here; only transport
    /// failures are errors.
    pub async fn forward(
        &self,
        target: &ResolvedTarget,
        endpoint: &str,
        request: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<Body>, ForwardError> {
        let url = self.upstream_url(endpoint, &target.path_and_query)?;
        let request_id = request.request_id().unwrap_or("unknown").to_string();
        let (parts, body) = request.into_parts();

        let mut headers = strip_hop_by_hop(&parts.headers);
        self.add_forwarded(&mut headers, &parts.headers, client_addr);
        if self.disable_keep_alives {
            headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        }

        let start = Instant::now();
        let sent = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .timeout(self.timeout)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await;

        let upstream = match sent {
            Ok(upstream) => upstream,
            Err(e) => {
                metrics::record_roundtrip(&target.service, None, start);
                tracing::warn!(
                    request_id = %request_id,
                    service = %target.service,
                    endpoint = %endpoint,
                    error = %e,
                    "Round trip error"
                );
                return Err(e.into());
            }
        };

        let status = upstream.status();
        metrics::record_roundtrip(&target.service, Some(status.as_u16()), start);
        tracing::debug!(
            request_id = %request_id,
            service = %target.service,
            url = %upstream.url(),
            status = status.as_u16(),
            duration = ?start.elapsed(),
            "Round trip"
        );

        let headers = strip_hop_by_hop(upstream.headers());
        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }

    fn add_forwarded(&self, headers: &mut HeaderMap, original: &HeaderMap, client_addr: Option<SocketAddr>) {
        if let Some(addr) = client_addr {
            let ip = addr.ip().to_string();
            let chain = match original.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(prior) if !prior.is_empty() => format!("{prior}, {ip}"),
                _ => ip,
            };
            if let Ok(value) = HeaderValue::from_str(&chain) {
                headers.insert(X_FORWARDED_FOR.clone(), value);
            }
        }
        if let Some(host) = original.get(header::HOST) {
            headers.insert(X_FORWARDED_HOST.clone(), host.clone());
        }
        headers.insert(X_FORWARDED_PROTO.clone(), HeaderValue::from_static("http"));
    }
}

/// Copy `headers` without hop-by-hop headers, the ones listed in
/// `Connection`, and `Host` (the client sets it from the upstream URL).
fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop_header(name.as_str()) || *name == header::HOST || listed.iter().any(|l| l == name.as_str()) {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }
    filtered
}

fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name,
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}
