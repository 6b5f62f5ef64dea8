//! Reaper: returns submissions stuck in processing to pending.
//!
//! A worker that dies after claiming a submission leaves it in processing,
//! where redelivered dispatches skip it. Once it has been processing longer
//! than the timeout, the reaper resets it and dispatches it again.

use chrono::{TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::{Shutdown, signalled};
use crate::error::{Error, Result};
use crate::model::SubmissionId;
use crate::queue::DispatchQueue;
use crate::store::SubmissionStore;
use crate::telemetry::metrics;

#[derive(Clone)]
pub struct Reaper {
    submissions: Arc<dyn SubmissionStore>,
    queue: Arc<dyn DispatchQueue>,
    processing_timeout: Duration,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Reaper {
    pub fn new(
        submissions: Arc<dyn SubmissionStore>,
        queue: Arc<dyn DispatchQueue>,
        processing_timeout: Duration,
        shutdown: &Shutdown,
    ) -> Self {
        Self {
            submissions,
            queue,
            processing_timeout,
            // Sweep a few times per timeout window, but not in a hot loop.
            interval: (processing_timeout / 4).max(Duration::from_secs(1)),
            shutdown: shutdown.subscribe(),
        }
    }

    /// Reset every stale processing submission and dispatch it again.
    pub async fn sweep(&self) -> Result<Vec<SubmissionId>> {
        let timeout = TimeDelta::from_std(self.processing_timeout)
            .map_err(|e| Error::Config(format!("processing timeout out of range: {e}")))?;
        let reaped = self.submissions.reset_stale(Utc::now() - timeout).await?;

        for id in &reaped {
            if let Err(e) = self.queue.enqueue(*id, Duration::ZERO).await {
                // Stays pending; resubmitting its reference dispatches it.
                warn!(submission_id = %id, "failed to re-dispatch reaped submission: {e}");
            }
        }
        if !reaped.is_empty() {
            metrics::submissions_reaped().add(reaped.len() as u64, &[]);
            warn!(count = reaped.len(), "reaped stale processing submissions");
        }
        Ok(reaped)
    }

    /// Sweep on an interval until shutdown.
    pub async fn run(&self) -> Result<()> {
        let mut shutdown = self.shutdown.clone();
        info!(timeout_secs = self.processing_timeout.as_secs(), "reaper started");
        loop {
            tokio::select! {
                _ = signalled(&mut shutdown) => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            if let Err(e) = self.sweep().await {
                error!("reaper sweep error: {e}");
            }
        }
        info!("reaper shutting down");
        Ok(())
    }
}
