//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files and
//! for exposure through `/_/config`.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Deployment label: DEBUG, DEV, STG or PROD.
    pub environment: String,

    /// Log level used when `RUST_LOG` is not set.
    pub log_level: String,

    /// Listen port; the proxy binds all interfaces.
    pub port: u16,

    /// Our own service name. Instances registered under it are never routed to.
    pub service_name: String,

    /// Cluster identity, suffix of the election lock key.
    pub cluster_name: String,

    /// How long in-flight requests may drain on shutdown.
    pub shutdown_timeout_secs: u64,

    pub routing: RoutingConfig,

    pub election: ElectionConfig,

    pub catalog: CatalogConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            environment: "DEBUG".to_string(),
            log_level: "debug".to_string(),
            port: 8000,
            service_name: "catalog-proxy".to_string(),
            cluster_name: "default".to_string(),
            shutdown_timeout_secs: 30,
            routing: RoutingConfig::default(),
            election: ElectionConfig::default(),
            catalog: CatalogConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// JSON logs for the deployed environments, human-readable elsewhere.
    pub fn is_structured_logging(&self) -> bool {
        matches!(self.environment.to_ascii_uppercase().as_str(), "PROD" | "STG")
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Election lock key: prefix followed by the cluster name.
    pub fn lock_key(&self) -> String {
        crate::election::lock_key(&self.election.key_prefix, &self.cluster_name)
    }
}

/// Scheme used to reach backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request routing and upstream connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub scheme: Scheme,

    /// When set, the service is taken from the Host header
    /// (`<service>.<domain>`) instead of the first path segment.
    pub domain: Option<String>,

    /// Idle connections kept per backend.
    pub max_idle_conns_per_host: usize,

    /// Close backend connections after every request.
    pub disable_keep_alives: bool,

    /// Per-request deadline, covering the whole round trip.
    pub request_timeout_secs: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            scheme: Scheme::Http,
            domain: None,
            max_idle_conns_per_host: 500,
            disable_keep_alives: true,
            request_timeout_secs: 30,
        }
    }
}

impl RoutingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// High-availability leader election.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ElectionConfig {
    pub enabled: bool,
    pub key_prefix: String,
    pub session_ttl_secs: u64,
    pub lock_delay_secs: u64,
    pub retry_interval_secs: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            key_prefix: "leader/election/".to_string(),
            session_ttl_secs: 10,
            lock_delay_secs: 5,
            retry_interval_secs: 5,
        }
    }
}

impl ElectionConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn lock_delay(&self) -> Duration {
        Duration::from_secs(self.lock_delay_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

/// Consul agent connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Agent HTTP address, e.g. `http://127.0.0.1:8500`.
    pub address: String,

    /// ACL token. Accepted on input, never written back out.
    #[serde(skip_serializing)]
    pub token: Option<String>,

    pub datacenter: Option<String>,

    /// Maximum wait of a blocking query.
    pub wait_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8500".to_string(),
            token: None,
            datacenter: None,
            wait_secs: 300,
        }
    }
}

impl CatalogConfig {
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }
}
