//! In-process FIFO hand-off of run ids between submission and the worker

use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Unbounded FIFO queue of backtest run ids.
///
/// Constructed once at startup and handed by `Arc` to the HTTP state and
/// the worker loop. Entries are lightweight handles, not job copies; the
/// queue is not durable across restarts and does not deduplicate; the
/// executor treats a run that is no longer pending as a no-op.
pub struct TaskQueue {
    tx: UnboundedSender<Uuid>,
    rx: Mutex<UnboundedReceiver<Uuid>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Append a run id to the tail. Never blocks; a send can only fail once
    /// the consumer half is gone during shutdown, which is logged rather
    /// than surfaced to the submitter.
    pub fn enqueue(&self, run_id: Uuid) {
        if self.tx.send(run_id).is_err() {
            warn!(run_id = %run_id, "TaskQueue: dropped run id, queue receiver is gone");
        }
    }

    /// Wait up to `max_wait` for the next run id. `None` means the queue
    /// stayed empty for the whole window, not an error.
    ///
    /// The worker loop is the sole caller; the internal lock exists so the
    /// receiver can live behind a shared reference, not to arbitrate
    /// between competing consumers.
    pub async fn dequeue(&self, max_wait: Duration) -> Option<Uuid> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(max_wait, rx.recv()).await {
            Ok(run_id) => run_id,
            Err(_) => None,
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
