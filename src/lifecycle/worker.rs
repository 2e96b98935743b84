//! Background workers and their supervision.
//!
//! # Responsibilities
//! - Common start/stop contract for long-running components
//! - Start every worker, stop them all on shutdown
//!
//! # Design Decisions
//! - `stop` only signals; the supervisor awaits the task handles
//! - Stopping is bounded by a deadline; tasks that overrun are aborted

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::task::JoinHandle;

/// A long-running component with an explicit lifecycle.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Spawn the worker's main task.
    fn start(self: Arc<Self>) -> JoinHandle<()>;

    /// Ask the worker to finish. Must not block on the worker's task.
    async fn stop(&self);
}

struct Running {
    worker: Arc<dyn Worker>,
    task: JoinHandle<()>,
}

/// Owns started workers until shutdown.
#[derive(Default)]
pub struct Supervisor {
    running: Vec<Running>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<W: Worker>(&mut self, worker: Arc<W>) {
        let name = worker.name();
        let task = worker.clone().start();
        tracing::info!(worker = name, "Worker started");
        self.running.push(Running { worker, task });
    }

    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    /// Stop all workers in reverse start order and wait for their tasks.
    pub async fn shutdown(self, deadline: Duration) {
        for running in self.running.iter().rev() {
            running.worker.stop().await;
        }

        let waits = self.running.into_iter().map(|running| async move {
            let name = running.worker.name();
            let mut task = running.task;
            match tokio::time::timeout(deadline, &mut task).await {
                Ok(Ok(())) => tracing::info!(worker = name, "Worker stopped"),
                Ok(Err(e)) => tracing::error!(worker = name, error = %e, "Worker task failed"),
                Err(_) => {
                    task.abort();
                    tracing::warn!(worker = name, "Worker did not stop before deadline, aborted");
                }
            }
        });
        join_all(waits).await;
    }
}
