//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, summaries)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape of /metrics)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing in PROD and STG
//! - Request ID flows through every proxied request
//! - Metrics go through the `metrics` facade; recording is a no-op until
//!   a recorder is installed, so tests need no setup

pub mod logging;
pub mod metrics;
