//! Service discovery subsystem.
//!
//! # Data Flow
//! ```text
//! External catalog (Consul or in-memory)
//!     → catalog-level watch ──┐
//!     → per-service watches ──┴→ watcher.rs (forward notifications)
//!                                  → trigger queue (mpsc)
//!                                  → sync.rs resync loop (one at a time)
//!                                      → filter instances (address, self, health)
//!                                      → compare fingerprints
//!                                      → Registry::update + reconcile watchers
//! ```
//!
//! # Design Decisions
//! - The catalog is consumed through the `ServiceCatalog` trait so the sync
//!   engine never depends on a concrete backend
//! - Watch streams never terminate on transient errors; implementations
//!   retry internally
//! - A failed resync leaves the registry and the watcher set untouched

pub mod memory;
pub mod sync;
pub mod watcher;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::InMemoryCatalog;
pub use sync::{RegistrySync, SyncError, SyncOutcome};

/// Errors returned by a catalog backend.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("catalog returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid catalog address: {0}")]
    InvalidAddress(String),

    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// Status reported by a single health check.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum CheckStatus {
    Passing,
    Warning,
    Critical,
    /// Node or service maintenance mode; never routed to.
    Maintenance,
    Unknown(String),
}

impl From<String> for CheckStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "passing" => CheckStatus::Passing,
            "warning" => CheckStatus::Warning,
            "critical" => CheckStatus::Critical,
            "maintenance" => CheckStatus::Maintenance,
            _ => CheckStatus::Unknown(value),
        }
    }
}

impl From<CheckStatus> for String {
    fn from(status: CheckStatus) -> Self {
        match status {
            CheckStatus::Passing => "passing".to_string(),
            CheckStatus::Warning => "warning".to_string(),
            CheckStatus::Critical => "critical".to_string(),
            CheckStatus::Maintenance => "maintenance".to_string(),
            CheckStatus::Unknown(other) => other,
        }
    }
}

/// A health check attached to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub check_id: String,
    pub name: String,
    pub status: CheckStatus,
}

impl HealthCheck {
    pub fn new(check_id: impl Into<String>, status: CheckStatus) -> Self {
        let check_id = check_id.into();
        Self {
            name: check_id.clone(),
            check_id,
            status,
        }
    }
}

/// One registered instance of a service, as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub node: String,
    pub service_id: String,
    /// Declared service identity.
    pub service: String,
    pub address: String,
    pub port: u16,
    pub checks: Vec<HealthCheck>,
}

impl ServiceInstance {
    pub fn new(service: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        let service = service.into();
        let address = address.into();
        Self {
            node: "local".to_string(),
            service_id: format!("{}-{}-{}", service, address, port),
            service,
            address,
            port,
            checks: Vec::new(),
        }
    }

    pub fn with_check(mut self, check: HealthCheck) -> Self {
        self.checks.push(check);
        self
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn endpoint(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }

    /// True when any attached check reports critical or maintenance.
    pub fn is_critical(&self) -> bool {
        self.checks
            .iter()
            .any(|c| matches!(c.status, CheckStatus::Critical | CheckStatus::Maintenance))
    }
}

/// A change notification delivered by a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    /// Catalog index at which the change was observed.
    pub index: u64,
}

/// A non-terminating stream of change notifications.
///
/// The first item is delivered as soon as the current state is known.
pub type WatchStream = BoxStream<'static, Notification>;

/// Capability consumed from the external service catalog.
#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    /// Names of all services known to the catalog.
    async fn services(&self) -> Result<Vec<String>, CatalogError>;

    /// Every instance of `service` together with its health checks.
    async fn service_instances(&self, service: &str) -> Result<Vec<ServiceInstance>, CatalogError>;

    /// Fires whenever a service appears in or disappears from the catalog.
    fn watch_catalog(&self) -> WatchStream;

    /// Fires whenever the instances or health of `service` change.
    fn watch_service(&self, service: &str) -> WatchStream;
}
