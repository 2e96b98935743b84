//! Thread-safe registry store.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::registry::{fingerprint_of, Catalog};

/// Point-in-time copy of the registry, as served by the admin endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySnapshot {
    pub catalog: Catalog,
    pub fingerprint: String,
    pub generation: u64,
}

#[derive(Debug)]
struct Inner {
    catalog: Catalog,
    fingerprint: String,
    generation: u64,
}

/// In-memory mirror of the external catalog.
///
/// Readers never observe a partially applied update: the catalog, its
/// fingerprint and the generation counter change together under the write
/// lock.
#[derive(Debug)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        let catalog = Catalog::new();
        let fingerprint = fingerprint_of(&catalog);
        Self {
            inner: RwLock::new(Inner {
                catalog,
                fingerprint,
                generation: 0,
            }),
        }
    }

    /// Endpoints registered for `service`, or `None` when the service is unknown.
    pub fn lookup(&self, service: &str) -> Option<Vec<String>> {
        self.read().catalog.get(service).cloned()
    }

    /// Replace the whole catalog.
    pub fn update(&self, catalog: Catalog) {
        let mut catalog = catalog;
        for endpoints in catalog.values_mut() {
            endpoints.sort_unstable();
        }
        let fingerprint = fingerprint_of(&catalog);

        let mut inner = self.write();
        inner.catalog = catalog;
        inner.fingerprint = fingerprint;
        inner.generation += 1;

        tracing::debug!(
            generation = inner.generation,
            services = inner.catalog.len(),
            fingerprint = %inner.fingerprint,
            "Registry swapped"
        );
    }

    pub fn fingerprint(&self) -> String {
        self.read().fingerprint.clone()
    }

    /// Number of updates applied since creation.
    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    /// Names of all registered services, sorted.
    pub fn service_names(&self) -> Vec<String> {
        self.read().catalog.keys().cloned().collect()
    }

    pub fn contains(&self, service: &str) -> bool {
        self.read().catalog.contains_key(service)
    }

    pub fn len(&self) -> usize {
        self.read().catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().catalog.is_empty()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.read();
        RegistrySnapshot {
            catalog: inner.catalog.clone(),
            fingerprint: inner.fingerprint.clone(),
            generation: inner.generation,
        }
    }

    // A panic while holding the lock cannot leave a torn snapshot behind
    // (fields are assigned after all fallible work), so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn catalog(entries: &[(&str, &[&str])]) -> Catalog {
        entries
            .iter()
            .map(|(name, eps)| (name.to_string(), eps.iter().map(|e| e.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_new_registry_is_empty() {
        let registry = Registry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.generation(), 0);
        assert_eq!(registry.fingerprint(), fingerprint_of(&Catalog::new()));
        assert!(registry.lookup("orders").is_none());
    }

    #[test]
    fn test_update_then_lookup() {
        let registry = Registry::new();
        registry.update(catalog(&[("orders", &["10.0.0.2:80", "10.0.0.1:80"]), ("users", &["10.0.1.1:8080"])]));

        assert_eq!(
            registry.lookup("orders"),
            Some(vec!["10.0.0.1:80".to_string(), "10.0.0.2:80".to_string()])
        );
        assert_eq!(registry.lookup("users"), Some(vec!["10.0.1.1:8080".to_string()]));
        assert!(registry.lookup("billing").is_none());
        assert_eq!(registry.generation(), 1);
    }

    #[test]
    fn test_update_discards_previous_catalog() {
        let registry = Registry::new();
        registry.update(catalog(&[("orders", &["10.0.0.1:80"])]));
        registry.update(catalog(&[("users", &["10.0.1.1:80"])]));

        assert!(registry.lookup("orders").is_none());
        assert!(registry.contains("users"));
        assert_eq!(registry.service_names(), vec!["users".to_string()]);
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let registry = Registry::new();
        let next = catalog(&[("orders", &["10.0.0.1:80"])]);
        registry.update(next.clone());
        assert_eq!(registry.fingerprint(), fingerprint_of(&next));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.catalog, next);
        assert_eq!(snapshot.fingerprint, fingerprint_of(&next));
        assert_eq!(snapshot.generation, 1);
    }

    #[test]
    fn test_empty_endpoint_list_is_found() {
        let registry = Registry::new();
        registry.update(catalog(&[("orders", &[])]));
        assert_eq!(registry.lookup("orders"), Some(Vec::new()));
    }

    #[test]
    fn test_concurrent_readers_see_whole_snapshots() {
        let registry = Arc::new(Registry::new());
        let a = catalog(&[("orders", &["a:1"]), ("users", &["a:2"])]);
        let b = catalog(&[("orders", &["b:1"]), ("users", &["b:2"])]);

        let writer = {
            let registry = registry.clone();
            let (a, b) = (a.clone(), b.clone());
            std::thread::spawn(move || {
                for i in 0..500 {
                    registry.update(if i % 2 == 0 { a.clone() } else { b.clone() });
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                let (a, b) = (a.clone(), b.clone());
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let snap = registry.snapshot();
                        if snap.generation > 0 {
                            assert!(snap.catalog == a || snap.catalog == b);
                            assert_eq!(snap.fingerprint, fingerprint_of(&snap.catalog));
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(registry.generation(), 500);
    }
}
