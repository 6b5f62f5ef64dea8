//! Workers: consume dispatches, drive the submission state machine and
//! retry failed materializations with backoff.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{Instrument, Span, debug, error, info, warn};

use super::{RetryPolicy, Shutdown, signalled};
use crate::error::{Error, Result};
use crate::materialize::Materializer;
use crate::model::{Submission, SubmissionId, SubmissionStatus};
use crate::queue::DispatchQueue;
use crate::store::{Claim, FailFrom, SubmissionStore, TicketStore};
use crate::telemetry::dispatch::{record_state_transition, start_dispatch_span};
use crate::telemetry::metrics;

/// Configuration for a worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long a read dispatch stays hidden before it is redelivered.
    pub visibility_timeout: Duration,
    /// Poll interval fallback when no readiness hint arrives.
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }
}

/// What a single dispatch did to its submission.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Ticket materialized; submission completed.
    Completed(Submission),
    /// Materialization failed with budget left; redelivery scheduled.
    Retrying { submission: Submission, delay: Duration },
    /// Materialization failed for good; submission failed.
    Failed(Submission),
    /// Nothing to do: the submission was not pending, or another writer
    /// moved it first.
    Skipped(SubmissionStatus),
    /// The dispatch named a submission that does not exist.
    Missing,
}

/// A dispatch consumer. Clone it to run several concurrently.
#[derive(Clone)]
pub struct Worker {
    submissions: Arc<dyn SubmissionStore>,
    queue: Arc<dyn DispatchQueue>,
    materializer: Materializer,
    config: WorkerConfig,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(
        submissions: Arc<dyn SubmissionStore>,
        tickets: Arc<dyn TicketStore>,
        queue: Arc<dyn DispatchQueue>,
        config: WorkerConfig,
        shutdown: &Shutdown,
    ) -> Self {
        Self {
            submissions,
            queue,
            materializer: Materializer::new(tickets),
            config,
            shutdown: shutdown.subscribe(),
        }
    }

    /// Run until shutdown is signalled.
    pub async fn run(&self) -> Result<()> {
        let mut shutdown = self.shutdown.clone();
        info!("worker started");

        while !*shutdown.borrow() {
            match self.process_next().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => error!("process_next error: {e}"),
            }

            tokio::select! {
                _ = signalled(&mut shutdown) => {}
                _ = self.queue.wait_ready(self.config.poll_interval) => {}
            }
        }

        info!("worker shutting down");
        Ok(())
    }

    /// Read and handle one dispatch. Returns whether one was available.
    ///
    /// A dispatch is acked once handled. If handling errors, it is left
    /// unacked so the visibility timeout redelivers it.
    pub async fn process_next(&self) -> Result<bool> {
        let Some(dispatch) = self.queue.dequeue(self.config.visibility_timeout).await? else {
            return Ok(false);
        };

        match self.handle(dispatch.submission_id).await {
            Ok(outcome) => {
                debug!(
                    submission_id = %dispatch.submission_id,
                    read_count = dispatch.read_count,
                    ?outcome,
                    "dispatch handled"
                );
                self.queue.ack(&dispatch).await?;
            }
            Err(e) => {
                error!(
                    submission_id = %dispatch.submission_id,
                    read_count = dispatch.read_count,
                    "dispatch failed, awaiting redelivery: {e}"
                );
            }
        }
        Ok(true)
    }

    /// Drive one submission through a dispatch. Idempotent under
    /// redelivery: only a pending submission is ever materialized.
    pub async fn handle(&self, id: SubmissionId) -> Result<DispatchOutcome> {
        let span = start_dispatch_span(id);
        self.handle_in_span(id, &span)
            .instrument(span.clone())
            .await
    }

    async fn handle_in_span(&self, id: SubmissionId, span: &Span) -> Result<DispatchOutcome> {
        let claim = match self.submissions.claim(id).await {
            Ok(claim) => claim,
            Err(Error::NotFound(_)) => {
                warn!(submission_id = %id, "submission not found, dropping dispatch");
                return Ok(DispatchOutcome::Missing);
            }
            Err(e) => return Err(e),
        };

        let submission = match claim {
            Claim::Claimed(submission) => submission,
            Claim::AlreadyCompleted(s) | Claim::AlreadyProcessing(s) | Claim::Failed(s) => {
                debug!(submission_id = %id, status = %s.status, "not pending, skipping");
                return Ok(DispatchOutcome::Skipped(s.status));
            }
        };
        record_state_transition(span, SubmissionStatus::Pending, SubmissionStatus::Processing);
        // Fences every write below against a reap and reclaim.
        let attempts = submission.attempts;

        match self.materializer.materialize(&submission).await {
            Ok(ticket) => {
                let Some(done) = lost_race(self.submissions.complete(id, attempts, ticket.id).await)?
                else {
                    warn!(submission_id = %id, ticket_id = %ticket.id, "submission moved while materializing");
                    return Ok(DispatchOutcome::Skipped(self.current_status(id).await?));
                };
                record_state_transition(span, SubmissionStatus::Processing, SubmissionStatus::Completed);
                info!(submission_id = %id, ticket_id = %ticket.id, "ticket materialized");
                Ok(DispatchOutcome::Completed(done))
            }
            Err(e) if e.is_retryable() && self.config.retry.should_retry(attempts) => {
                let delay = self.config.retry.delay_for(attempts);
                let Some(released) = lost_race(self.submissions.release(id, attempts).await)? else {
                    return Ok(DispatchOutcome::Skipped(self.current_status(id).await?));
                };
                self.queue.enqueue(id, delay).await?;
                metrics::retries_scheduled().add(1, &[]);
                record_state_transition(span, SubmissionStatus::Processing, SubmissionStatus::Pending);
                warn!(
                    submission_id = %id,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "materialization failed, retrying: {e}"
                );
                Ok(DispatchOutcome::Retrying {
                    submission: released,
                    delay,
                })
            }
            Err(e) => {
                let message = e.to_string();
                let Some(failed) = lost_race(
                    self.submissions
                        .fail(id, FailFrom::Claim(attempts), &message)
                        .await,
                )?
                else {
                    return Ok(DispatchOutcome::Skipped(self.current_status(id).await?));
                };
                record_state_transition(span, SubmissionStatus::Processing, SubmissionStatus::Failed);
                error!(submission_id = %id, attempts, "submission failed: {message}");
                Ok(DispatchOutcome::Failed(failed))
            }
        }
    }

    async fn current_status(&self, id: SubmissionId) -> Result<SubmissionStatus> {
        Ok(self.submissions.get(id).await?.status)
    }
}

/// A lost compare-and-transition is a no-op for the loser, not an error.
fn lost_race(result: Result<Submission>) -> Result<Option<Submission>> {
    match result {
        Ok(submission) => Ok(Some(submission)),
        Err(Error::Conflict(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Spawn `count` clones of `worker`, each running until shutdown.
pub fn spawn_workers(worker: &Worker, count: usize) -> JoinSet<Result<()>> {
    let mut set = JoinSet::new();
    for index in 0..count.max(1) {
        let worker = worker.clone();
        set.spawn(
            async move { worker.run().await }
                .instrument(tracing::info_span!("worker", index)),
        );
    }
    set
}
