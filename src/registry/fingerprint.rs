//! Content fingerprint of a catalog.

use sha2::{Digest, Sha256};

use crate::registry::Catalog;

/// Hex encoded SHA-256 of the canonical JSON form of `catalog`.
///
/// Keys are already ordered by the map; endpoint lists are sorted before
/// hashing so two catalogs with the same content always hash the same.
pub fn fingerprint_of(catalog: &Catalog) -> String {
    let canonical: Vec<(&str, Vec<&str>)> = catalog
        .iter()
        .map(|(service, endpoints)| {
            let mut sorted: Vec<&str> = endpoints.iter().map(String::as_str).collect();
            sorted.sort_unstable();
            (service.as_str(), sorted)
        })
        .collect();

    // Serializing borrowed strings and vectors cannot fail.
    let encoded = serde_json::to_vec(&canonical).unwrap_or_default();
    hex::encode(Sha256::digest(&encoded))
}
