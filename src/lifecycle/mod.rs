//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Metrics → Registry + Consul → Workers → Listener
//!
//! Workers (worker.rs):
//!     RegistrySync, LeadershipElection started by the Supervisor
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop workers → Stop accepting → Drain → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Shutdown has timeout: forced exit after deadline

pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod worker;

pub use shutdown::Shutdown;
pub use startup::{run, serve, StartupError};
pub use worker::{Supervisor, Worker};
