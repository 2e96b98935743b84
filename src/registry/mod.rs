//! Local service registry.
//!
//! # Data Flow
//! ```text
//! RegistrySync (single writer)
//!     → builds a candidate Catalog
//!     → fingerprint.rs (content hash)
//!     → store.rs update() (atomic swap under write lock)
//!
//! Request handlers / admin endpoints (many readers)
//!     → store.rs lookup() / snapshot() (shared read lock)
//! ```
//!
//! # Design Decisions
//! - The whole catalog is replaced on update; no incremental diffs
//! - Fingerprint is recomputed on every swap so it never drifts from content
//! - The read lock is never held across an await point

pub mod fingerprint;
pub mod store;

use std::collections::BTreeMap;

pub use fingerprint::fingerprint_of;
pub use store::{Registry, RegistrySnapshot};

/// Service name → `host:port` endpoints.
pub type Catalog = BTreeMap<String, Vec<String>>;
