//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Service resolved → endpoints looked up in the registry
//!     → Apply load balancing algorithm:
//!         - random.rs (uniform random pick)
//!     → Return endpoint or None when the list is empty
//! ```
//!
//! # Design Decisions
//! - Balancers see a plain endpoint slice; the registry owns membership
//!   and health filtering
//! - Selection never blocks and never allocates

pub mod random;

pub use random::RandomBalancer;

/// Load balancing strategy trait.
pub trait LoadBalancer: Send + Sync {
    /// Pick one endpoint, `None` only when `endpoints` is empty.
    fn next_endpoint<'a>(&self, endpoints: &'a [String]) -> Option<&'a str>;
}
