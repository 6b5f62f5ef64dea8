//! Submission engine: intake with deduplication, retrying workers, the
//! stale-processing reaper and queue metrics.

pub mod intake;
pub mod queue_metrics;
pub mod reaper;
pub mod retry;
pub mod worker;

pub use intake::{Engine, SubmissionRequest, SubmitResult};
pub use reaper::Reaper;
pub use retry::RetryPolicy;
pub use worker::{DispatchOutcome, Worker, WorkerConfig, spawn_workers};

use std::sync::Arc;
use tokio::sync::watch;

/// Shutdown signal shared by workers and the reaper.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Ask every loop holding a receiver to stop after its current dispatch.
    pub fn signal(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_signalled(&self) -> bool {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Wait until shutdown is signalled (or every sender is gone).
pub(crate) async fn signalled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
