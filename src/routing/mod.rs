//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path, query)
//!     → resolver.rs (addressing mode decides where the service name lives)
//!     → Return: service name + forwarded path, or RoutingError
//! ```
//!
//! # Design Decisions
//! - Addressing mode is fixed at startup from `routing.domain`
//! - No regex in hot path (segment split and suffix check only)
//! - Deterministic: same input always resolves to the same target
//! - Host matching is case-insensitive, path matching is not

pub mod resolver;

pub use resolver::{AddressingMode, ResolvedTarget, RoutingError, ServiceResolver};
