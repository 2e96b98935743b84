//! Consul session locks.
//!
//! # Responsibilities
//! - Create a session per lock attempt and keep it renewed
//! - Acquire the KV key with the session, waiting with blocking queries
//! - Report loss when the session dies or the key changes hands
//!
//! # Design Decisions
//! - Sessions use `behavior = release` so a dead holder frees the key
//! - Renewal runs every TTL/2; a session that cannot be renewed for a
//!   whole TTL is treated as lost
//! - An abandoned attempt destroys its session in the background

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};

use crate::consul::client::{ConsulClient, Indexed};
use crate::election::{HeldLock, LockError, LockRelease, Locker};

const MONITOR_RETRY: Duration = Duration::from_secs(1);

pub struct ConsulLocker {
    client: Arc<ConsulClient>,
    session_ttl: Duration,
    lock_delay: Duration,
}

impl ConsulLocker {
    pub fn new(client: Arc<ConsulClient>, session_ttl: Duration, lock_delay: Duration) -> Self {
        Self { client, session_ttl, lock_delay }
    }
}

#[async_trait]
impl Locker for ConsulLocker {
    async fn lock(&self, key: &str, identity: &str) -> Result<HeldLock, LockError> {
        let session = Session::create(self.client.clone(), identity, self.session_ttl, self.lock_delay).await?;
        let mut expired = session.expired();
        let mut index = 0;

        loop {
            let fetched = tokio::select! {
                biased;
                _ = wait_expired(&mut expired) => {
                    return Err(LockError::SessionLost(session.id.clone()));
                }
                fetched = self.client.kv_get(key, index) => fetched?,
            };
            let Indexed { index: next, value: pair } = fetched;
            index = next.max(1);

            match pair.and_then(|pair| pair.session) {
                Some(holder) if holder == session.id => break,
                // Held elsewhere: block on the key until it changes.
                Some(_) => continue,
                None => {}
            }

            if self.client.kv_acquire(key, &session.id, identity).await? {
                break;
            }
            // Free but refused: the previous holder's lock-delay is running.
            tracing::debug!(key = %key, delay = ?self.lock_delay, "Lock refused, waiting out lock delay");
            tokio::select! {
                biased;
                _ = wait_expired(&mut expired) => return Err(LockError::SessionLost(session.id.clone())),
                _ = tokio::time::sleep(self.lock_delay) => {}
            }
        }

        tracing::debug!(key = %key, session = %session.id, "Lock acquired");

        let (lost_tx, lost_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(monitor_lock(
            self.client.clone(),
            key.to_string(),
            session.id.clone(),
            index,
            session.expired(),
            stop_rx,
            lost_tx,
        ));

        let release = ConsulRelease {
            client: self.client.clone(),
            key: key.to_string(),
            session,
            stop_monitor: stop_tx,
        };
        Ok(HeldLock::new(key, lost_rx, Box::new(release)))
    }

    async fn holder(&self, key: &str) -> Result<Option<String>, LockError> {
        let pair = self.client.kv_get(key, 0).await?.value;
        let Some(session) = pair.and_then(|pair| pair.session) else {
            return Ok(None);
        };
        let info = self.client.session_info(&session).await?;
        Ok(info.map(|entry| entry.name))
    }
}

struct ConsulRelease {
    client: Arc<ConsulClient>,
    key: String,
    session: Session,
    stop_monitor: watch::Sender<bool>,
}

#[async_trait]
impl LockRelease for ConsulRelease {
    async fn release(self: Box<Self>) -> Result<(), LockError> {
        let this = *self;
        this.stop_monitor.send_replace(true);

        let released = this.client.kv_release(&this.key, &this.session.id).await;
        if let Err(e) = &released {
            tracing::warn!(key = %this.key, error = %e, "Failed to release lock key");
        }
        this.session.destroy().await?;
        released?;
        Ok(())
    }
}

/// Fire `lost` once the session expires or the key is no longer ours.
async fn monitor_lock(
    client: Arc<ConsulClient>,
    key: String,
    session: String,
    mut index: u64,
    mut expired: watch::Receiver<bool>,
    mut stop: watch::Receiver<bool>,
    lost: oneshot::Sender<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => return,
            _ = wait_expired(&mut expired) => {
                tracing::warn!(key = %key, session = %session, "Lock session expired");
                break;
            }
            fetched = client.kv_get(&key, index) => match fetched {
                Ok(Indexed { index: next, value }) => {
                    index = next.max(1);
                    if value.and_then(|pair| pair.session).as_deref() != Some(session.as_str()) {
                        tracing::warn!(key = %key, session = %session, "Lock key no longer held by session");
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(key = %key, error = %e, "Lock monitor query failed");
                    tokio::select! {
                        biased;
                        _ = stop.changed() => return,
                        _ = wait_expired(&mut expired) => {
                            tracing::warn!(key = %key, session = %session, "Lock session expired");
                            break;
                        }
                        _ = tokio::time::sleep(MONITOR_RETRY) => {}
                    }
                }
            },
        }
    }
    let _ = lost.send(());
}

async fn wait_expired(expired: &mut watch::Receiver<bool>) {
    let _ = expired.wait_for(|expired| *expired).await;
}

/// A Consul session kept alive by a background renewal task.
struct Session {
    id: String,
    client: Arc<ConsulClient>,
    stop_renewal: watch::Sender<bool>,
    expired: watch::Receiver<bool>,
    destroyed: bool,
}

impl Session {
    async fn create(
        client: Arc<ConsulClient>,
        name: &str,
        ttl: Duration,
        lock_delay: Duration,
    ) -> Result<Self, LockError> {
        let id = client.session_create(name, ttl, lock_delay).await?;
        tracing::debug!(session = %id, name = %name, ttl = ?ttl, "Session created");

        let (stop_renewal, stop_rx) = watch::channel(false);
        let (expired_tx, expired) = watch::channel(false);
        tokio::spawn(renew_session(client.clone(), id.clone(), ttl, stop_rx, expired_tx));

        Ok(Self { id, client, stop_renewal, expired, destroyed: false })
    }

    fn expired(&self) -> watch::Receiver<bool> {
        self.expired.clone()
    }

    async fn destroy(mut self) -> Result<(), LockError> {
        self.destroyed = true;
        self.stop_renewal.send_replace(true);
        self.client.session_destroy(&self.id).await?;
        tracing::debug!(session = %self.id, "Session destroyed");
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }
        self.stop_renewal.send_replace(true);
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let client = self.client.clone();
        let id = std::mem::take(&mut self.id);
        runtime.spawn(async move {
            if let Err(e) = client.session_destroy(&id).await {
                tracing::debug!(session = %id, error = %e, "Failed to destroy abandoned session");
            }
        });
    }
}

async fn renew_session(
    client: Arc<ConsulClient>,
    id: String,
    ttl: Duration,
    mut stop: watch::Receiver<bool>,
    expired: watch::Sender<bool>,
) {
    let period = ttl / 2;
    let mut last_renewed = Instant::now();

    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => return,
            _ = tokio::time::sleep(period) => {}
        }

        match client.session_renew(&id).await {
            Ok(true) => last_renewed = Instant::now(),
            Ok(false) => {
                tracing::warn!(session = %id, "Session no longer exists");
                expired.send_replace(true);
                return;
            }
            Err(e) if last_renewed.elapsed() >= ttl => {
                tracing::warn!(session = %id, error = %e, "Session could not be renewed within its TTL");
                expired.send_replace(true);
                return;
            }
            Err(e) => tracing::debug!(session = %id, error = %e, "Session renewal failed, retrying"),
        }
    }
}
