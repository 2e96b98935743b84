//! Watch subscriptions.
//!
//! A subscription is a background task that forwards every notification of
//! one watch stream into the sync engine's trigger queue. Stopping is
//! signal-only: the task exits at its next suspension point and is never
//! joined by the caller.

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::discovery::WatchStream;

/// What a notification asks the sync engine to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// The set of services changed.
    Catalog,
    /// Instances or health of one service changed.
    Service(String),
}

/// Handle to a running watch subscription.
#[derive(Debug)]
pub struct WatchHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Spawn a task forwarding `stream` into `triggers` as `trigger`.
    pub fn spawn(
        mut stream: WatchStream,
        trigger: Trigger,
        triggers: mpsc::UnboundedSender<Trigger>,
    ) -> Self {
        let (stop, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    next = stream.next() => match next {
                        Some(notification) => {
                            tracing::trace!(?trigger, index = notification.index, "Watch fired");
                            if triggers.send(trigger.clone()).is_err() {
                                break;
                            }
                        }
                        None => {
                            tracing::warn!(?trigger, "Watch stream ended");
                            break;
                        }
                    },
                }
            }
            tracing::debug!(?trigger, "Watch stopped");
        });

        Self { stop, task }
    }

    /// Signal the subscription to stop.
    pub fn stop(self) {
        let _ = self.stop.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
