//! Storage seams for submissions and tickets.
//!
//! Two backends implement these traits: Postgres (`crate::db`) and an
//! in-process store (`memory`). Both enforce client-reference uniqueness and
//! compare-and-transition semantics, so the engine never re-checks them.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::model::{
    ClientReference, NewTicket, Submission, SubmissionId, SubmissionStatus, Ticket, TicketId,
};

pub use memory::{MemorySubmissionStore, MemoryTicketStore};

/// What happened when a worker tried to take a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// Was pending; now processing and owned by the caller.
    Claimed(Submission),
    /// Already has a ticket. Redelivered dispatch.
    AlreadyCompleted(Submission),
    /// Another worker holds it.
    AlreadyProcessing(Submission),
    /// Failed submissions are only revived by a resubmission.
    Failed(Submission),
}

/// The state [`SubmissionStore::fail`] expects to find a submission in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailFrom {
    /// Queued and not claimed since.
    Pending,
    /// Held by the claim that returned this attempt count.
    Claim(u32),
}

impl FailFrom {
    pub fn status(self) -> SubmissionStatus {
        match self {
            FailFrom::Pending => SubmissionStatus::Pending,
            FailFrom::Claim(_) => SubmissionStatus::Processing,
        }
    }

    pub fn claimed_attempts(self) -> Option<u32> {
        match self {
            FailFrom::Pending => None,
            FailFrom::Claim(attempts) => Some(attempts),
        }
    }
}

/// Per-state counts used by the queue metrics aggregator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: SubmissionStatus, n: u64) {
        match status {
            SubmissionStatus::Pending => self.pending += n,
            SubmissionStatus::Processing => self.processing += n,
            SubmissionStatus::Completed => self.completed += n,
            SubmissionStatus::Failed => self.failed += n,
        }
    }
}

/// Durable record of submissions and their lifecycle.
///
/// Every transition is a compare-and-transition scoped to one submission:
/// it applies only if the current status matches, otherwise it returns
/// [`Error::Conflict`] and leaves the record untouched.
///
/// Transitions out of Processing are fenced by the attempt count the claim
/// returned. Once a stale claim is reaped and the submission claimed again,
/// the earlier holder's writes are rejected as conflicts.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Insert a new submission. Fails with [`Error::DuplicateReference`] when
    /// its client reference is taken.
    async fn insert(&self, submission: &Submission) -> Result<()>;

    async fn get(&self, id: SubmissionId) -> Result<Submission>;

    async fn find_by_reference(&self, reference: &ClientReference) -> Result<Option<Submission>>;

    /// Atomically read the submission and, only if pending, mark it
    /// processing and count the attempt.
    async fn claim(&self, id: SubmissionId) -> Result<Claim>;

    /// Processing → Completed with the materialized ticket.
    async fn complete(
        &self,
        id: SubmissionId,
        claimed_attempts: u32,
        ticket_id: TicketId,
    ) -> Result<Submission>;

    /// Processing → Pending so a delayed dispatch can retry it.
    async fn release(&self, id: SubmissionId, claimed_attempts: u32) -> Result<Submission>;

    /// Pending/Processing → Failed with an error message. Terminal.
    async fn fail(&self, id: SubmissionId, from: FailFrom, error: &str) -> Result<Submission>;

    /// Failed → Pending with a replacement payload and a fresh retry budget.
    async fn reset(&self, id: SubmissionId, payload: Map<String, Value>) -> Result<Submission>;

    /// Move every submission processing since before `cutoff` back to
    /// pending. Returns the ids that were moved.
    async fn reset_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<SubmissionId>>;

    async fn status_counts(&self) -> Result<StatusCounts>;

    /// Creation time of the oldest pending or processing submission.
    async fn oldest_active_created_at(&self) -> Result<Option<DateTime<Utc>>>;
}

/// The ticket-creation collaborator.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Persist one ticket atomically. When `submission_id` is already
    /// materialized, return that ticket instead of creating a second.
    async fn create(&self, new: NewTicket) -> Result<Ticket>;

    async fn get(&self, id: TicketId) -> Result<Ticket>;

    async fn find_by_submission(&self, id: SubmissionId) -> Result<Option<Ticket>>;
}

/// Validate a transition, returning an error if disallowed.
pub(crate) fn validate_transition(from: SubmissionStatus, to: SubmissionStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// The error a lost compare-and-transition reports.
pub(crate) fn conflict(id: SubmissionId, expected: SubmissionStatus) -> Error {
    Error::Conflict(format!("submission {id} is no longer {expected}"))
}

/// The error a write from a superseded claim reports.
pub(crate) fn stale_claim(id: SubmissionId, claimed_attempts: u32) -> Error {
    Error::Conflict(format!(
        "submission {id} is no longer held by attempt {claimed_attempts}"
    ))
}
