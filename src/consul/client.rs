//! Minimal Consul HTTP API client.
//!
//! Only the catalog, health, session and KV endpoints the proxy needs.
//! Blocking queries follow Consul's `index`/`wait` protocol and report the
//! `X-Consul-Index` of every response.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::CatalogConfig;
use crate::discovery::{CatalogError, CheckStatus, HealthCheck, ServiceInstance};

const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A response body together with its blocking-query index.
#[derive(Debug, Clone)]
pub struct Indexed<T> {
    pub index: u64,
    pub value: T,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceEntry {
    pub node: NodeEntry,
    pub service: AgentService,
    #[serde(default)]
    pub checks: Vec<CheckEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeEntry {
    pub node: String,
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentService {
    #[serde(rename = "ID")]
    pub id: String,
    pub service: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CheckEntry {
    #[serde(rename = "CheckID")]
    pub check_id: String,
    #[serde(default)]
    pub name: String,
    pub status: CheckStatus,
}

impl From<ServiceEntry> for ServiceInstance {
    fn from(entry: ServiceEntry) -> Self {
        ServiceInstance {
            node: entry.node.node,
            service_id: entry.service.id,
            service: entry.service.service,
            address: entry.service.address,
            port: entry.service.port,
            checks: entry
                .checks
                .into_iter()
                .map(|check| HealthCheck {
                    check_id: check.check_id,
                    name: check.name,
                    status: check.status,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionRequest {
    pub name: String,
    #[serde(rename = "TTL")]
    pub ttl: String,
    pub lock_delay: String,
    pub behavior: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionEntry {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KvPair {
    pub key: String,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub lock_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SessionCreated {
    #[serde(rename = "ID")]
    id: String,
}

pub struct ConsulClient {
    http: reqwest::Client,
    base: Url,
    token: Option<String>,
    datacenter: Option<String>,
    wait: Duration,
}

impl ConsulClient {
    pub fn new(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let base = Url::parse(&config.address)
            .map_err(|e| CatalogError::InvalidAddress(format!("{}: {e}", config.address)))?;
        if base.cannot_be_a_base() {
            return Err(CatalogError::InvalidAddress(config.address.clone()));
        }

        let http = reqwest::Client::builder()
            .connect_timeout(REQUEST_TIMEOUT)
            .no_proxy()
            .build()?;

        Ok(Self {
            http,
            base,
            token: config.token.clone(),
            datacenter: config.datacenter.clone(),
            wait: config.wait(),
        })
    }

    pub fn address(&self) -> &Url {
        &self.base
    }

    /// `GET /v1/catalog/services`: names of every registered service.
    pub async fn catalog_services(&self, index: u64) -> Result<Indexed<Vec<String>>, CatalogError> {
        let url = self.url(&["catalog", "services"])?;
        let response = self.send(self.blocking(Method::GET, url, index)).await?;
        let index = response_index(&response);
        let services: BTreeMap<String, Vec<String>> = decode(response).await?;
        Ok(Indexed { index, value: services.into_keys().collect() })
    }

    /// `GET /v1/health/service/{name}`: every instance, whatever its health.
    pub async fn health_service(
        &self,
        service: &str,
        index: u64,
    ) -> Result<Indexed<Vec<ServiceEntry>>, CatalogError> {
        let url = self.url(&["health", "service", service])?;
        let response = self.send(self.blocking(Method::GET, url, index)).await?;
        let index = response_index(&response);
        let entries: Option<Vec<ServiceEntry>> = decode(response).await?;
        Ok(Indexed { index, value: entries.unwrap_or_default() })
    }

    pub async fn session_create(
        &self,
        name: &str,
        ttl: Duration,
        lock_delay: Duration,
    ) -> Result<String, CatalogError> {
        let url = self.url(&["session", "create"])?;
        let body = SessionRequest {
            name: name.to_string(),
            ttl: format!("{}s", ttl.as_secs()),
            lock_delay: format!("{}s", lock_delay.as_secs()),
            behavior: "release".to_string(),
        };
        let response = self.send(self.request(Method::PUT, url).json(&body)).await?;
        let created: SessionCreated = decode(response).await?;
        Ok(created.id)
    }

    /// Returns `false` when the session no longer exists.
    pub async fn session_renew(&self, session: &str) -> Result<bool, CatalogError> {
        let url = self.url(&["session", "renew", session])?;
        let response = self.request(Method::PUT, url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_status(response).await?;
        Ok(true)
    }

    pub async fn session_destroy(&self, session: &str) -> Result<(), CatalogError> {
        let url = self.url(&["session", "destroy", session])?;
        self.send(self.request(Method::PUT, url)).await?;
        Ok(())
    }

    pub async fn session_info(&self, session: &str) -> Result<Option<SessionEntry>, CatalogError> {
        let url = self.url(&["session", "info", session])?;
        let response = self.send(self.request(Method::GET, url)).await?;
        let sessions: Option<Vec<SessionEntry>> = decode(response).await?;
        Ok(sessions.and_then(|sessions| sessions.into_iter().next()))
    }

    /// `GET /v1/kv/{key}`. A missing key is `None`, not an error.
    pub async fn kv_get(&self, key: &str, index: u64) -> Result<Indexed<Option<KvPair>>, CatalogError> {
        let url = self.kv_url(key, &[])?;
        let response = self.blocking(Method::GET, url, index).send().await?;
        let index = response_index(&response);
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Indexed { index, value: None });
        }
        let response = check_status(response).await?;
        let pairs: Option<Vec<KvPair>> = decode(response).await?;
        Ok(Indexed { index, value: pairs.and_then(|pairs| pairs.into_iter().next()) })
    }

    /// Try to take `key` for `session`. `true` when acquired.
    pub async fn kv_acquire(&self, key: &str, session: &str, value: &str) -> Result<bool, CatalogError> {
        let url = self.kv_url(key, &[("acquire", session)])?;
        let response = self.send(self.request(Method::PUT, url).body(value.to_string())).await?;
        decode(response).await
    }

    pub async fn kv_release(&self, key: &str, session: &str) -> Result<bool, CatalogError> {
        let url = self.kv_url(key, &[("release", session)])?;
        let response = self.send(self.request(Method::PUT, url)).await?;
        decode(response).await
    }

    fn url(&self, segments: &[&str]) -> Result<Url, CatalogError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| CatalogError::InvalidAddress(self.base.to_string()))?
            .pop_if_empty()
            .push("v1")
            .extend(segments);
        if let Some(dc) = &self.datacenter {
            url.query_pairs_mut().append_pair("dc", dc);
        }
        Ok(url)
    }

    fn kv_url(&self, key: &str, params: &[(&str, &str)]) -> Result<Url, CatalogError> {
        let mut segments = vec!["kv"];
        segments.extend(key.split('/').filter(|segment| !segment.is_empty()));
        let mut url = self.url(&segments)?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url).timeout(REQUEST_TIMEOUT);
        match &self.token {
            Some(token) => builder.header(TOKEN_HEADER, token),
            None => builder,
        }
    }

    /// A request that blocks server side until `index` changes or the wait
    /// elapses. Index 0 returns immediately.
    fn blocking(&self, method: Method, mut url: Url, index: u64) -> RequestBuilder {
        if index == 0 {
            return self.request(method, url);
        }
        url.query_pairs_mut()
            .append_pair("index", &index.to_string())
            .append_pair("wait", &format!("{}s", self.wait.as_secs()));
        // Consul adds up to wait/16 of jitter to the wait.
        let timeout = self.wait + self.wait / 16 + Duration::from_secs(5);
        self.request(method, url).timeout(timeout)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, CatalogError> {
        let response = builder.send().await?;
        check_status(response).await
    }
}

async fn check_status(response: Response) -> Result<Response, CatalogError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CatalogError::Status { status: status.as_u16(), body })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, CatalogError> {
    Ok(response.json::<T>().await?)
}

fn response_index(response: &Response) -> u64 {
    response
        .headers()
        .get(INDEX_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}
