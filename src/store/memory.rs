//! In-process storage backend.
//!
//! One async mutex guards all submissions, so every operation is trivially a
//! single atomic read-modify-write. The reference index plays the role of the
//! database uniqueness constraint.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{
    Claim, FailFrom, StatusCounts, SubmissionStore, TicketStore, conflict, stale_claim,
    validate_transition,
};
use crate::error::{Error, Result};
use crate::model::{
    ClientReference, NewTicket, Submission, SubmissionId, SubmissionStatus, Ticket, TicketId,
};

#[derive(Default)]
struct Submissions {
    by_id: HashMap<SubmissionId, Submission>,
    by_reference: HashMap<ClientReference, SubmissionId>,
}

impl Submissions {
    fn get_mut(&mut self, id: SubmissionId) -> Result<&mut Submission> {
        self.by_id
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("submission {id}")))
    }

    /// Apply `update` only if the submission is currently in `from` and,
    /// when fenced, still held by the claim that counted `claimed_attempts`.
    fn transition(
        &mut self,
        id: SubmissionId,
        from: SubmissionStatus,
        claimed_attempts: Option<u32>,
        to: SubmissionStatus,
        update: impl FnOnce(&mut Submission, DateTime<Utc>),
    ) -> Result<Submission> {
        validate_transition(from, to)?;
        let submission = self.get_mut(id)?;
        if submission.status != from {
            return Err(conflict(id, from));
        }
        if let Some(attempts) = claimed_attempts.filter(|a| *a != submission.attempts) {
            return Err(stale_claim(id, attempts));
        }
        let now = Utc::now();
        submission.status = to;
        submission.updated_at = now;
        update(submission, now);
        Ok(submission.clone())
    }
}

/// Submissions held in process memory.
#[derive(Default)]
pub struct MemorySubmissionStore {
    inner: Mutex<Submissions>,
}

impl MemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored submission, oldest first.
    pub async fn all(&self) -> Vec<Submission> {
        let inner = self.inner.lock().await;
        let mut all: Vec<Submission> = inner.by_id.values().cloned().collect();
        all.sort_by_key(|s| s.created_at);
        all
    }
}

#[async_trait]
impl SubmissionStore for MemorySubmissionStore {
    async fn insert(&self, submission: &Submission) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.by_reference.contains_key(&submission.client_reference) {
            return Err(Error::DuplicateReference(
                submission.client_reference.to_string(),
            ));
        }
        if inner.by_id.contains_key(&submission.id) {
            return Err(Error::Conflict(format!(
                "submission {} already exists",
                submission.id
            )));
        }
        inner
            .by_reference
            .insert(submission.client_reference.clone(), submission.id);
        inner.by_id.insert(submission.id, submission.clone());
        Ok(())
    }

    async fn get(&self, id: SubmissionId) -> Result<Submission> {
        self.inner
            .lock()
            .await
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("submission {id}")))
    }

    async fn find_by_reference(&self, reference: &ClientReference) -> Result<Option<Submission>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .by_reference
            .get(reference)
            .and_then(|id| inner.by_id.get(id))
            .cloned())
    }

    async fn claim(&self, id: SubmissionId) -> Result<Claim> {
        let mut inner = self.inner.lock().await;
        let submission = inner.get_mut(id)?;
        match submission.status {
            SubmissionStatus::Completed => Ok(Claim::AlreadyCompleted(submission.clone())),
            SubmissionStatus::Processing => Ok(Claim::AlreadyProcessing(submission.clone())),
            SubmissionStatus::Failed => Ok(Claim::Failed(submission.clone())),
            SubmissionStatus::Pending => {
                submission.status = SubmissionStatus::Processing;
                submission.attempts += 1;
                submission.updated_at = Utc::now();
                Ok(Claim::Claimed(submission.clone()))
            }
        }
    }

    async fn complete(
        &self,
        id: SubmissionId,
        claimed_attempts: u32,
        ticket_id: TicketId,
    ) -> Result<Submission> {
        self.inner.lock().await.transition(
            id,
            SubmissionStatus::Processing,
            Some(claimed_attempts),
            SubmissionStatus::Completed,
            |s, now| {
                s.ticket_id = Some(ticket_id);
                s.error_message.clear();
                s.completed_at = Some(now);
            },
        )
    }

    async fn release(&self, id: SubmissionId, claimed_attempts: u32) -> Result<Submission> {
        self.inner.lock().await.transition(
            id,
            SubmissionStatus::Processing,
            Some(claimed_attempts),
            SubmissionStatus::Pending,
            |_, _| {},
        )
    }

    async fn fail(&self, id: SubmissionId, from: FailFrom, error: &str) -> Result<Submission> {
        self.inner.lock().await.transition(
            id,
            from.status(),
            from.claimed_attempts(),
            SubmissionStatus::Failed,
            |s, now| {
                s.ticket_id = None;
                s.error_message = error.to_string();
                s.completed_at = Some(now);
            },
        )
    }

    async fn reset(&self, id: SubmissionId, payload: Map<String, Value>) -> Result<Submission> {
        self.inner.lock().await.transition(
            id,
            SubmissionStatus::Failed,
            None,
            SubmissionStatus::Pending,
            |s, _| {
                s.ticket_id = None;
                s.error_message.clear();
                s.completed_at = None;
                s.attempts = 0;
                s.request_payload = payload;
            },
        )
    }

    async fn reset_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<SubmissionId>> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let mut moved = Vec::new();
        for submission in inner.by_id.values_mut() {
            if submission.status == SubmissionStatus::Processing && submission.updated_at < cutoff
            {
                submission.status = SubmissionStatus::Pending;
                submission.updated_at = now;
                moved.push(submission.id);
            }
        }
        Ok(moved)
    }

    async fn status_counts(&self) -> Result<StatusCounts> {
        let inner = self.inner.lock().await;
        let mut counts = StatusCounts::default();
        for submission in inner.by_id.values() {
            counts.add(submission.status, 1);
        }
        Ok(counts)
    }

    async fn oldest_active_created_at(&self) -> Result<Option<DateTime<Utc>>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .by_id
            .values()
            .filter(|s| s.status.is_active())
            .map(|s| s.created_at)
            .min())
    }
}

/// Tickets held in process memory.
#[derive(Default)]
pub struct MemoryTicketStore {
    tickets: Mutex<Vec<Ticket>>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tickets.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn all(&self) -> Vec<Ticket> {
        self.tickets.lock().await.clone()
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn create(&self, new: NewTicket) -> Result<Ticket> {
        let mut tickets = self.tickets.lock().await;
        let existing = new
            .submission_id
            .and_then(|sid| tickets.iter().find(|t| t.submission_id == Some(sid)));
        if let Some(existing) = existing {
            return Ok(existing.clone());
        }
        let ticket = new.into_ticket();
        tickets.push(ticket.clone());
        Ok(ticket)
    }

    async fn get(&self, id: TicketId) -> Result<Ticket> {
        self.tickets
            .lock()
            .await
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("ticket {id}")))
    }

    async fn find_by_submission(&self, id: SubmissionId) -> Result<Option<Ticket>> {
        Ok(self
            .tickets
            .lock()
            .await
            .iter()
            .find(|t| t.submission_id == Some(id))
            .cloned())
    }
}
