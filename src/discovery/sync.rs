//! Registry synchronization engine.
//!
//! # Responsibilities
//! - Rebuild the candidate catalog from the external catalog on every trigger
//! - Skip the registry write when the fingerprint is unchanged
//! - Keep exactly one watch per registered service
//!
//! # Design Decisions
//! - Watch tasks only enqueue triggers; a single loop runs `resync`, so
//!   resyncs never overlap
//! - Lock order is watcher map (outer) then registry read (inner)
//! - Self-exclusion compares the declared service name exactly

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use futures_util::future::try_join_all;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::discovery::watcher::{Trigger, WatchHandle};
use crate::discovery::{CatalogError, ServiceCatalog, ServiceInstance};
use crate::lifecycle::Worker;
use crate::observability::metrics;
use crate::registry::{fingerprint_of, Catalog, Registry};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("catalog fetch failed: {0}")]
    Catalog(#[from] CatalogError),
}

/// Result of one resync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Upstream content matched the registry; nothing was written.
    Unchanged,
    /// The registry was replaced.
    Updated { services: usize },
}

/// Keeps a `Registry` consistent with an external `ServiceCatalog`.
pub struct RegistrySync {
    registry: Arc<Registry>,
    catalog: Arc<dyn ServiceCatalog>,
    /// Own service identity, never routed to.
    self_service: String,
    watchers: Mutex<HashMap<String, WatchHandle>>,
    catalog_watch: Mutex<Option<WatchHandle>>,
    triggers: mpsc::UnboundedSender<Trigger>,
    pending: StdMutex<Option<mpsc::UnboundedReceiver<Trigger>>>,
    stop_tx: watch::Sender<bool>,
}

impl RegistrySync {
    pub fn new(
        registry: Arc<Registry>,
        catalog: Arc<dyn ServiceCatalog>,
        self_service: impl Into<String>,
    ) -> Self {
        let (triggers, pending) = mpsc::unbounded_channel();
        let (stop_tx, _) = watch::channel(false);
        Self {
            registry,
            catalog,
            self_service: self_service.into(),
            watchers: Mutex::new(HashMap::new()),
            catalog_watch: Mutex::new(None),
            triggers,
            pending: StdMutex::new(Some(pending)),
            stop_tx,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Rebuild the registry from the catalog.
    ///
    /// Any fetch error aborts the pass before anything is written.
    pub async fn resync(&self) -> Result<SyncOutcome, SyncError> {
        let services = self.catalog.services().await?;

        let fetches = services.into_iter().map(|service| async move {
            let instances = self.catalog.service_instances(&service).await?;
            Ok::<_, CatalogError>((service, instances))
        });
        let fetched = try_join_all(fetches).await?;

        let mut candidate = Catalog::new();
        for (service, instances) in fetched {
            let endpoints: Vec<String> = instances
                .iter()
                .filter(|instance| self.is_routable(instance))
                .map(ServiceInstance::endpoint)
                .collect();
            if !endpoints.is_empty() {
                candidate.insert(service, endpoints);
            }
        }

        if fingerprint_of(&candidate) == self.registry.fingerprint() {
            tracing::debug!(services = candidate.len(), "Registry unchanged, skipping update");
            return Ok(SyncOutcome::Unchanged);
        }

        let services = candidate.len();
        self.registry.update(candidate);
        metrics::record_registry_update(services);
        tracing::info!(services, "Registry has been updated");

        self.reconcile_watchers().await;
        Ok(SyncOutcome::Updated { services })
    }

    fn is_routable(&self, instance: &ServiceInstance) -> bool {
        if instance.address.is_empty() {
            tracing::trace!(service_id = %instance.service_id, "Skipping instance without address");
            return false;
        }
        if instance.service == self.self_service {
            return false;
        }
        if instance.is_critical() {
            tracing::debug!(
                service = %instance.service,
                endpoint = %instance.endpoint(),
                "Skipping instance with critical health check"
            );
            return false;
        }
        true
    }

    /// Make the set of per-service watches match the registry's services.
    pub async fn reconcile_watchers(&self) {
        let mut watchers = self.watchers.lock().await;
        let present: BTreeSet<String> = self.registry.service_names().into_iter().collect();

        let gone: Vec<String> = watchers
            .keys()
            .filter(|service| !present.contains(*service))
            .cloned()
            .collect();
        for service in gone {
            if let Some(handle) = watchers.remove(&service) {
                handle.stop();
                tracing::info!(service = %service, "Watch for service has been removed");
            }
        }

        if !*self.stop_tx.borrow() {
            for service in present {
                if watchers.contains_key(&service) {
                    continue;
                }
                let handle = WatchHandle::spawn(
                    self.catalog.watch_service(&service),
                    Trigger::Service(service.clone()),
                    self.triggers.clone(),
                );
                tracing::info!(service = %service, "Watch for service has been started");
                watchers.insert(service, handle);
            }
        }

        metrics::record_active_watchers(watchers.len());
    }

    /// Services that currently have an active watch, sorted.
    pub async fn active_watchers(&self) -> Vec<String> {
        let mut services: Vec<String> = self.watchers.lock().await.keys().cloned().collect();
        services.sort();
        services
    }

    pub async fn handle_catalog_change(&self) {
        tracing::info!("Catalog change detected");
        self.resync_logged().await;
    }

    pub async fn handle_service_change(&self, service: &str) {
        tracing::info!(service = %service, "Service change detected");
        self.resync_logged().await;
    }

    async fn resync_logged(&self) {
        if let Err(e) = self.resync().await {
            metrics::record_resync_error();
            tracing::warn!(error = %e, "Registry resync failed, keeping current registry");
        }
    }

    async fn run(self: Arc<Self>) {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(mut triggers) = pending else {
            tracing::warn!("Registry sync already started");
            return;
        };
        let mut stop_rx = self.stop_tx.subscribe();

        {
            // Checked under the lock `stop` takes, so a concurrent stop either
            // prevents the watch or finds it stored.
            let mut slot = self.catalog_watch.lock().await;
            if *stop_rx.borrow_and_update() {
                return;
            }
            *slot = Some(WatchHandle::spawn(
                self.catalog.watch_catalog(),
                Trigger::Catalog,
                self.triggers.clone(),
            ));
        }
        tracing::info!("Registry sync started");

        loop {
            let trigger = tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                trigger = triggers.recv() => match trigger {
                    Some(trigger) => trigger,
                    None => break,
                },
            };

            // Every pass is a full resync, so triggers queued meanwhile add nothing.
            let mut coalesced = 0usize;
            while triggers.try_recv().is_ok() {
                coalesced += 1;
            }
            if coalesced > 0 {
                tracing::debug!(coalesced, "Coalesced queued watch triggers");
            }

            match trigger {
                Trigger::Catalog => self.handle_catalog_change().await,
                Trigger::Service(service) => self.handle_service_change(&service).await,
            }
        }

        tracing::info!("Registry sync stopped");
    }
}

#[async_trait]
impl Worker for RegistrySync {
    fn name(&self) -> &'static str {
        "registry-sync"
    }

    fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn stop(&self) {
        self.stop_tx.send_replace(true);

        if let Some(handle) = self.catalog_watch.lock().await.take() {
            handle.stop();
        }

        let mut watchers = self.watchers.lock().await;
        for (service, handle) in watchers.drain() {
            handle.stop();
            tracing::debug!(service = %service, "Watch for service has been stopped");
        }
        metrics::record_active_watchers(0);
    }
}
