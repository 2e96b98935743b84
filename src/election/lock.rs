//! Distributed lock capability.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::discovery::CatalogError;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("catalog request failed: {0}")]
    Catalog(#[from] CatalogError),

    #[error("session {0} was invalidated")]
    SessionLost(String),

    #[error("lock service unavailable: {0}")]
    Unavailable(String),
}

/// Source of mutually exclusive named locks.
#[async_trait]
pub trait Locker: Send + Sync {
    /// Block until `key` is held on behalf of `identity`.
    ///
    /// Dropping the returned future abandons the attempt without holding
    /// the lock.
    async fn lock(&self, key: &str, identity: &str) -> Result<HeldLock, LockError>;

    /// Identity of the current holder of `key`, if any.
    async fn holder(&self, key: &str) -> Result<Option<String>, LockError>;
}

/// Gives a held lock back to its `Locker`.
#[async_trait]
pub trait LockRelease: Send {
    async fn release(self: Box<Self>) -> Result<(), LockError>;
}

/// A lock currently held by this process.
pub struct HeldLock {
    key: String,
    lost: oneshot::Receiver<()>,
    is_lost: bool,
    release: Box<dyn LockRelease>,
}

impl HeldLock {
    pub fn new(key: impl Into<String>, lost: oneshot::Receiver<()>, release: Box<dyn LockRelease>) -> Self {
        Self { key: key.into(), lost, is_lost: false, release }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Resolve once ownership is gone. Cancel safe.
    ///
    /// A dropped loss sender counts as loss: nobody is left to vouch for
    /// the lock.
    pub async fn lost(&mut self) {
        if self.is_lost {
            return;
        }
        let _ = (&mut self.lost).await;
        self.is_lost = true;
    }

    pub fn is_lost(&mut self) -> bool {
        if !self.is_lost {
            self.is_lost = !matches!(self.lost.try_recv(), Err(oneshot::error::TryRecvError::Empty));
        }
        self.is_lost
    }

    pub async fn release(self) -> Result<(), LockError> {
        self.release.release().await
    }
}

impl std::fmt::Debug for HeldLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeldLock")
            .field("key", &self.key)
            .field("is_lost", &self.is_lost)
            .finish()
    }
}
