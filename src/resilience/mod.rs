//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Catalog watch request fails:
//!     → backoff.rs (exponential delay with jitter)
//!     → retry the blocking query
//! ```
//!
//! # Design Decisions
//! - Watches never give up; the delay is capped instead
//! - Any success resets the failure count

pub mod backoff;

pub use backoff::{calculate_backoff, Backoff};
