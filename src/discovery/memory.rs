//! In-memory service catalog.
//!
//! Behaves like the external catalog as far as the sync engine can tell:
//! it lists services, reports instances with their checks and fires watch
//! notifications on every mutation. Used by tests and local runs without a
//! catalog agent.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use tokio::sync::watch;

use crate::discovery::{
    CatalogError, CheckStatus, Notification, ServiceCatalog, ServiceInstance, WatchStream,
};

/// A catalog held entirely in process memory.
pub struct InMemoryCatalog {
    services: RwLock<BTreeMap<String, Vec<ServiceInstance>>>,
    catalog_index: watch::Sender<u64>,
    service_index: DashMap<String, watch::Sender<u64>>,
    pending_failures: AtomicUsize,
    fetches: AtomicUsize,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        let (catalog_index, _) = watch::channel(0);
        Self {
            services: RwLock::new(BTreeMap::new()),
            catalog_index,
            service_index: DashMap::new(),
            pending_failures: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Add or replace an instance (matched by service and instance id).
    pub fn register(&self, instance: ServiceInstance) {
        let service = instance.service.clone();
        let created = {
            let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
            let instances = services.entry(service.clone()).or_default();
            let created = instances.is_empty();
            instances.retain(|i| i.service_id != instance.service_id);
            instances.push(instance);
            created
        };
        if created {
            self.bump_catalog();
        }
        self.bump_service(&service);
    }

    /// Remove one instance; the service disappears with its last instance.
    pub fn deregister(&self, service: &str, service_id: &str) {
        let removed_service = {
            let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
            match services.get_mut(service) {
                Some(instances) => {
                    instances.retain(|i| i.service_id != service_id);
                    if instances.is_empty() {
                        services.remove(service);
                        true
                    } else {
                        false
                    }
                }
                None => return,
            }
        };
        if removed_service {
            self.bump_catalog();
        }
        self.bump_service(service);
    }

    /// Remove a service and every instance of it.
    pub fn remove_service(&self, service: &str) {
        let removed = self
            .services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(service)
            .is_some();
        if removed {
            self.bump_catalog();
            self.bump_service(service);
        }
    }

    /// Change the status of a check on every instance of `service` that has it.
    pub fn set_check_status(&self, service: &str, check_id: &str, status: CheckStatus) {
        {
            let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
            let Some(instances) = services.get_mut(service) else {
                return;
            };
            for check in instances.iter_mut().flat_map(|i| i.checks.iter_mut()) {
                if check.check_id == check_id {
                    check.status = status.clone();
                }
            }
        }
        self.bump_service(service);
    }

    /// Make the next `count` fetches fail with `CatalogError::Unavailable`.
    pub fn fail_next_fetches(&self, count: usize) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Number of fetch calls served so far (successful or not).
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn begin_fetch(&self) -> Result<(), CatalogError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(CatalogError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }

    fn bump_catalog(&self) {
        self.catalog_index.send_modify(|index| *index += 1);
    }

    fn bump_service(&self, service: &str) {
        self.service_sender(service).send_modify(|index| *index += 1);
    }

    fn service_sender(&self, service: &str) -> watch::Sender<u64> {
        self.service_index
            .entry(service.to_string())
            .or_insert_with(|| watch::channel(0).0)
            .clone()
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Turn a watch receiver into a notification stream: one item immediately,
/// then one per change. Ends only when the sender is gone.
fn notifications(rx: watch::Receiver<u64>) -> WatchStream {
    stream::unfold((rx, true), |(mut rx, first)| async move {
        if !first {
            rx.changed().await.ok()?;
        }
        let index = *rx.borrow_and_update();
        Some((Notification { index }, (rx, false)))
    })
    .boxed()
}

#[async_trait]
impl ServiceCatalog for InMemoryCatalog {
    async fn services(&self) -> Result<Vec<String>, CatalogError> {
        self.begin_fetch()?;
        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
        Ok(services.keys().cloned().collect())
    }

    async fn service_instances(&self, service: &str) -> Result<Vec<ServiceInstance>, CatalogError> {
        self.begin_fetch()?;
        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
        Ok(services.get(service).cloned().unwrap_or_default())
    }

    fn watch_catalog(&self) -> WatchStream {
        notifications(self.catalog_index.subscribe())
    }

    fn watch_service(&self, service: &str) -> WatchStream {
        notifications(self.service_sender(service).subscribe())
    }
}
