//! Single long-running consumer of the task queue

use crate::core::queue::TaskQueue;
use crate::jobs::executor::BacktestExecutor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// The sole consumer of the task queue, executing one job at a time.
///
/// Shutdown is cooperative: the watch channel is checked between dequeue
/// attempts, so a job already executing runs to completion (or to its
/// timeout) before the loop exits. A failed job never terminates the loop.
pub struct BacktestWorker {
    queue: Arc<TaskQueue>,
    executor: Arc<BacktestExecutor>,
    shutdown: watch::Receiver<bool>,
    poll_interval: Duration,
}

impl BacktestWorker {
    pub fn new(
        queue: Arc<TaskQueue>,
        executor: Arc<BacktestExecutor>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            executor,
            shutdown,
            poll_interval: crate::config::get_worker_poll_interval(),
        }
    }

    /// Override the bounded dequeue wait (shutdown responsiveness knob)
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Run until the shutdown signal flips. Executor errors are logged and
    /// swallowed; only the shutdown signal ends the loop.
    pub async fn run(self) {
        info!("BacktestWorker: started");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let Some(run_id) = self.queue.dequeue(self.poll_interval).await else {
                continue;
            };

            info!(run_id = %run_id, "BacktestWorker: picked up run {}", run_id);
            if let Err(e) = self.executor.execute(run_id).await {
                error!(
                    run_id = %run_id,
                    error = %e,
                    "BacktestWorker: run {} failed outside the sandbox, continuing",
                    run_id
                );
            }
        }

        info!("BacktestWorker: stopped");
    }
}
