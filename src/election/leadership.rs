//! Leader election loop.
//!
//! # Responsibilities
//! - Repeatedly try to take the cluster lock
//! - Track Follower / Leader / Stopped state
//! - Give the lock back on loss or shutdown
//!
//! # Design Decisions
//! - State flips to Follower before the lock is released, so this
//!   instance never claims leadership for a lock it no longer holds
//! - Failed attempts wait a fixed retry interval; stop interrupts the wait

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::election::lock::Locker;
use crate::lifecycle::Worker;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ElectionState {
    Follower = 0,
    Leader = 1,
    Stopped = 2,
}

impl From<u8> for ElectionState {
    fn from(value: u8) -> Self {
        match value {
            1 => ElectionState::Leader,
            2 => ElectionState::Stopped,
            _ => ElectionState::Follower,
        }
    }
}

pub struct LeadershipElection {
    locker: Arc<dyn Locker>,
    key: String,
    identity: String,
    retry_interval: Duration,
    state: AtomicU8,
    /// Last observed holder identity.
    leader: ArcSwapOption<String>,
    stop_tx: watch::Sender<bool>,
}

impl LeadershipElection {
    pub fn new(
        locker: Arc<dyn Locker>,
        key: impl Into<String>,
        identity: impl Into<String>,
        retry_interval: Duration,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            locker,
            key: key.into(),
            identity: identity.into(),
            retry_interval,
            state: AtomicU8::new(ElectionState::Follower as u8),
            leader: ArcSwapOption::empty(),
            stop_tx,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.state() == ElectionState::Leader
    }

    pub fn state(&self) -> ElectionState {
        ElectionState::from(self.state.load(Ordering::Acquire))
    }

    pub fn leader(&self) -> Option<String> {
        self.leader.load_full().map(|leader| leader.as_ref().clone())
    }

    pub fn lock_key(&self) -> &str {
        &self.key
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    fn set_state(&self, state: ElectionState) {
        self.state.store(state as u8, Ordering::Release);
        metrics::record_leadership(state == ElectionState::Leader);
    }

    async fn observe_holder(&self) {
        match self.locker.holder(&self.key).await {
            Ok(holder) => {
                if let Some(identity) = &holder {
                    tracing::info!(key = %self.key, leader = %identity, "Current leader observed");
                }
                self.leader.store(holder.map(Arc::new));
            }
            Err(e) => tracing::debug!(key = %self.key, error = %e, "Failed to read current leader"),
        }
    }

    async fn run(self: Arc<Self>) {
        let mut stop_rx = self.stop_tx.subscribe();

        loop {
            if *stop_rx.borrow_and_update() {
                break;
            }

            self.observe_holder().await;

            let attempt = tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                attempt = self.locker.lock(&self.key, &self.identity) => attempt,
            };

            let mut held = match attempt {
                Ok(held) => held,
                Err(e) => {
                    metrics::record_election_attempt("error");
                    tracing::warn!(
                        key = %self.key,
                        error = %e,
                        retry_in = ?self.retry_interval,
                        "Failed to acquire leadership lock"
                    );
                    tokio::select! {
                        biased;
                        _ = stop_rx.changed() => break,
                        _ = tokio::time::sleep(self.retry_interval) => continue,
                    }
                }
            };

            metrics::record_election_attempt("acquired");
            self.leader.store(Some(Arc::new(self.identity.clone())));
            self.set_state(ElectionState::Leader);
            tracing::info!(key = %self.key, identity = %self.identity, "Leadership acquired");

            let stopping = tokio::select! {
                biased;
                _ = stop_rx.changed() => true,
                _ = held.lost() => false,
            };

            self.set_state(ElectionState::Follower);
            self.leader.store(None);
            if stopping {
                tracing::info!(key = %self.key, "Stepping down");
            } else {
                tracing::warn!(key = %self.key, "Leadership lost");
            }

            if let Err(e) = held.release().await {
                tracing::warn!(key = %self.key, error = %e, "Failed to release leadership lock");
            }

            if stopping {
                break;
            }
        }

        self.set_state(ElectionState::Stopped);
        tracing::info!(key = %self.key, "Leadership election stopped");
    }
}

#[async_trait]
impl Worker for LeadershipElection {
    fn name(&self) -> &'static str {
        "leadership-election"
    }

    fn start(self: Arc<Self>) -> JoinHandle<()> {
        tracing::info!(key = %self.key, identity = %self.identity, "Leadership election started");
        tokio::spawn(self.run())
    }

    async fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}
