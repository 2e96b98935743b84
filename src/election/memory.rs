//! In-process lock table.
//!
//! Stands in for the Consul locker in tests and single-node deployments.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{oneshot, Notify};

use crate::election::lock::{HeldLock, LockError, LockRelease, Locker};

struct Holder {
    session: u64,
    identity: String,
    lost: oneshot::Sender<()>,
}

#[derive(Default)]
pub struct InMemoryLocker {
    holders: Arc<DashMap<String, Holder>>,
    released: Arc<Notify>,
    next_session: AtomicU64,
    pending_failures: AtomicUsize,
    acquisitions: AtomicUsize,
}

impl InMemoryLocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidate the current holder of `key`, as if its session expired.
    /// Returns whether anything was held.
    pub fn expire(&self, key: &str) -> bool {
        let Some((_, holder)) = self.holders.remove(key) else {
            return false;
        };
        let _ = holder.lost.send(());
        tracing::debug!(key = %key, identity = %holder.identity, "Lock expired");
        self.released.notify_waiters();
        true
    }

    /// Make the next `count` lock attempts fail.
    pub fn fail_next_locks(&self, count: usize) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Successful acquisitions so far.
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn try_acquire(&self, key: &str, identity: &str) -> Option<HeldLock> {
        match self.holders.entry(key.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let session = self.next_session.fetch_add(1, Ordering::SeqCst);
                let (lost_tx, lost_rx) = oneshot::channel();
                slot.insert(Holder { session, identity: identity.to_string(), lost: lost_tx });
                self.acquisitions.fetch_add(1, Ordering::SeqCst);

                let release = MemoryRelease {
                    holders: self.holders.clone(),
                    released: self.released.clone(),
                    key: key.to_string(),
                    session,
                };
                Some(HeldLock::new(key, lost_rx, Box::new(release)))
            }
        }
    }
}

#[async_trait]
impl Locker for InMemoryLocker {
    async fn lock(&self, key: &str, identity: &str) -> Result<HeldLock, LockError> {
        if self.take_failure() {
            return Err(LockError::Unavailable("injected failure".to_string()));
        }
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed.
            notified.as_mut().enable();

            if let Some(held) = self.try_acquire(key, identity) {
                return Ok(held);
            }
            notified.await;
        }
    }

    async fn holder(&self, key: &str) -> Result<Option<String>, LockError> {
        Ok(self.holders.get(key).map(|holder| holder.identity.clone()))
    }
}

struct MemoryRelease {
    holders: Arc<DashMap<String, Holder>>,
    released: Arc<Notify>,
    key: String,
    session: u64,
}

#[async_trait]
impl LockRelease for MemoryRelease {
    async fn release(self: Box<Self>) -> Result<(), LockError> {
        // A lock that already expired may have a new owner; leave it alone.
        self.holders.remove_if(&self.key, |_, holder| holder.session == self.session);
        self.released.notify_waiters();
        Ok(())
    }
}
