//! `ServiceCatalog` backed by a Consul agent.

use std::sync::Arc;

use async_trait::async_trait;

use crate::consul::client::ConsulClient;
use crate::consul::watch::blocking_watch;
use crate::discovery::{CatalogError, ServiceCatalog, ServiceInstance, WatchStream};

#[derive(Clone)]
pub struct ConsulCatalog {
    client: Arc<ConsulClient>,
}

impl ConsulCatalog {
    pub fn new(client: Arc<ConsulClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ServiceCatalog for ConsulCatalog {
    async fn services(&self) -> Result<Vec<String>, CatalogError> {
        Ok(self.client.catalog_services(0).await?.value)
    }

    async fn service_instances(&self, service: &str) -> Result<Vec<ServiceInstance>, CatalogError> {
        let entries = self.client.health_service(service, 0).await?.value;
        Ok(entries.into_iter().map(ServiceInstance::from).collect())
    }

    fn watch_catalog(&self) -> WatchStream {
        let client = self.client.clone();
        blocking_watch("catalog", move |index| {
            let client = client.clone();
            async move { Ok(client.catalog_services(index).await?.index) }
        })
    }

    fn watch_service(&self, service: &str) -> WatchStream {
        let client = self.client.clone();
        let service = service.to_string();
        blocking_watch(format!("service:{service}"), move |index| {
            let client = client.clone();
            let service = service.clone();
            async move { Ok(client.health_service(&service, index).await?.index) }
        })
    }
}
