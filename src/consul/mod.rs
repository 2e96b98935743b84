//! Consul integration.
//!
//! # Data Flow
//! ```text
//! client.rs (HTTP API, blocking queries)
//!     → catalog.rs (ServiceCatalog: services, health, watches)
//!     → watch.rs   (blocking query loop → notification stream)
//!     → lock.rs    (Locker: sessions + KV acquire/release)
//! ```
//!
//! # Design Decisions
//! - One shared client per process
//! - Watches retry forever with backoff; callers stop them by dropping
//!   the stream

pub mod catalog;
pub mod client;
pub mod lock;
pub mod watch;

pub use catalog::ConsulCatalog;
pub use client::ConsulClient;
pub use lock::ConsulLocker;
