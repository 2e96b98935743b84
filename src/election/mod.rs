//! Leadership election subsystem.
//!
//! # Data Flow
//! ```text
//! LeadershipElection loop
//!     → Locker::holder (observe current leader, logging only)
//!     → Locker::lock (blocks until acquired)
//!     → HeldLock::lost (wait while leader)
//!     → HeldLock::release
//! ```
//!
//! # Design Decisions
//! - Lock implementations are pluggable: Consul sessions in production,
//!   an in-process table for tests and single-node runs
//! - Leadership is advisory; the proxy keeps serving while a follower

pub mod leadership;
pub mod lock;
pub mod memory;

pub use leadership::{ElectionState, LeadershipElection};
pub use lock::{HeldLock, LockError, LockRelease, Locker};
pub use memory::InMemoryLocker;

/// Lock key for a cluster: the configured prefix followed by the cluster name.
pub fn lock_key(prefix: &str, cluster_name: &str) -> String {
    format!("{prefix}{cluster_name}")
}
