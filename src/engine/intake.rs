//! Intake: the public API for submitting and tracking ticket submissions.
//!
//! Deduplication happens here. A client reference maps to at most one
//! submission, and what a repeated request does depends on that
//! submission's state.

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::queue_metrics;
use crate::error::{Error, Result};
use crate::materialize::{payload_from_ticket, ticket_from_payload};
use crate::model::{
    ClientReference, QueueMetrics, Submission, SubmissionId, SubmissionStatus, Ticket,
};
use crate::queue::DispatchQueue;
use crate::store::{FailFrom, SubmissionStore, TicketStore};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

/// An inbound ticket-creation request, before validation.
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    client_reference: Option<String>,
    body: Map<String, Value>,
}

impl SubmissionRequest {
    /// Wrap a request body. `client_reference` inside the body is honored.
    pub fn from_json(value: Value) -> Result<Self> {
        let Value::Object(mut body) = value else {
            return Err(Error::Validation("request body must be a JSON object".into()));
        };
        let client_reference = match body.remove("client_reference") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            Some(_) => {
                return Err(Error::Validation(
                    "client_reference must be a string".into(),
                ));
            }
        };
        Ok(Self {
            client_reference,
            body,
        })
    }

    pub fn client_reference(mut self, reference: impl Into<String>) -> Self {
        self.client_reference = Some(reference.into());
        self
    }

    /// Validate and normalize. A blank reference counts as absent.
    pub fn normalize(self) -> Result<(Option<ClientReference>, Map<String, Value>)> {
        let reference = match self.client_reference {
            Some(r) if !r.trim().is_empty() => Some(ClientReference::new(r)?),
            _ => None,
        };
        let ticket = ticket_from_payload(&self.body, None)?;
        Ok((reference, payload_from_ticket(&ticket)))
    }
}

/// What happened when a request was submitted.
#[derive(Debug, Clone)]
pub enum SubmitResult {
    /// New submission recorded and dispatched.
    Created(Submission),
    /// Existing submission still in flight (or reset after failure) and
    /// dispatched again.
    Accepted(Submission),
    /// Existing submission already has its ticket. Nothing was dispatched.
    AlreadyCompleted(Submission),
}

impl SubmitResult {
    pub fn submission(&self) -> &Submission {
        match self {
            SubmitResult::Created(s)
            | SubmitResult::Accepted(s)
            | SubmitResult::AlreadyCompleted(s) => s,
        }
    }

    pub fn into_submission(self) -> Submission {
        match self {
            SubmitResult::Created(s)
            | SubmitResult::Accepted(s)
            | SubmitResult::AlreadyCompleted(s) => s,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            SubmitResult::Created(_) => "created",
            SubmitResult::Accepted(_) => "accepted",
            SubmitResult::AlreadyCompleted(_) => "already_completed",
        }
    }
}

/// The submission engine. Owns the store, ticket and queue handles.
#[derive(Clone)]
pub struct Engine {
    submissions: Arc<dyn SubmissionStore>,
    tickets: Arc<dyn TicketStore>,
    queue: Arc<dyn DispatchQueue>,
}

// Bound on re-resolving after losing a race to a concurrent request.
const RESOLVE_ATTEMPTS: usize = 3;

impl Engine {
    pub fn new(
        submissions: Arc<dyn SubmissionStore>,
        tickets: Arc<dyn TicketStore>,
        queue: Arc<dyn DispatchQueue>,
    ) -> Self {
        Self {
            submissions,
            tickets,
            queue,
        }
    }

    /// Submit a request. Validates, deduplicates by client reference, records
    /// and dispatches.
    pub async fn submit(&self, request: SubmissionRequest) -> Result<SubmitResult> {
        let result = self.submit_inner(request).await;
        let outcome = match &result {
            Ok(r) => r.label(),
            Err(Error::Validation(_)) => "invalid",
            Err(_) => "error",
        };
        metrics::submissions_received().add(1, &[KeyValue::new("outcome", outcome)]);
        result
    }

    async fn submit_inner(&self, request: SubmissionRequest) -> Result<SubmitResult> {
        let (reference, payload) = request.normalize()?;
        let Some(reference) = reference else {
            return self.create(Submission::pending(None, payload)).await;
        };

        for _ in 0..RESOLVE_ATTEMPTS {
            let existing = self.submissions.find_by_reference(&reference).await?;
            let outcome = match existing {
                None => {
                    self.create(Submission::pending(Some(reference.clone()), payload.clone()))
                        .await
                }
                Some(existing) => self.resolve_existing(existing, payload.clone()).await,
            };
            match outcome {
                // Someone else inserted or reset it first: look again.
                Err(Error::DuplicateReference(_)) | Err(Error::Conflict(_)) => continue,
                other => return other,
            }
        }
        Err(Error::Conflict(format!(
            "client reference {reference} kept changing during submit"
        )))
    }

    async fn create(&self, submission: Submission) -> Result<SubmitResult> {
        self.submissions.insert(&submission).await?;
        self.dispatch_or_fail(submission.id)
            .await?;
        info!(
            submission_id = %submission.id,
            client_reference = %submission.client_reference,
            "submission created"
        );
        Ok(SubmitResult::Created(submission))
    }

    async fn resolve_existing(
        &self,
        existing: Submission,
        payload: Map<String, Value>,
    ) -> Result<SubmitResult> {
        match existing.status {
            SubmissionStatus::Completed => Ok(SubmitResult::AlreadyCompleted(existing)),
            SubmissionStatus::Pending | SubmissionStatus::Processing => {
                // At-least-once: a redundant dispatch is a no-op in the worker.
                self.queue.enqueue(existing.id, Duration::ZERO).await?;
                info!(submission_id = %existing.id, status = %existing.status, "duplicate submission re-dispatched");
                Ok(SubmitResult::Accepted(existing))
            }
            SubmissionStatus::Failed => {
                let reset = self.submissions.reset(existing.id, payload).await?;
                self.dispatch_or_fail(reset.id)
                    .await?;
                info!(submission_id = %reset.id, "failed submission reset for resubmission");
                Ok(SubmitResult::Accepted(reset))
            }
        }
    }

    /// Enqueue a dispatch. If the queue refuses it, record the failure on
    /// the submission so a resubmission can recover it.
    async fn dispatch_or_fail(&self, id: SubmissionId) -> Result<()> {
        let Err(e) = self.queue.enqueue(id, Duration::ZERO).await else {
            return Ok(());
        };
        warn!(submission_id = %id, error = %e, "dispatch enqueue failed");
        let message = format!("dispatch failed: {e}");
        if let Err(mark) = self.submissions.fail(id, FailFrom::Pending, &message).await {
            warn!(submission_id = %id, error = %mark, "could not record dispatch failure");
        }
        Err(e)
    }

    /// Get a submission by ID.
    pub async fn get(&self, id: SubmissionId) -> Result<Submission> {
        self.submissions.get(id).await
    }

    /// Get a submission together with its ticket, when completed.
    pub async fn get_with_ticket(&self, id: SubmissionId) -> Result<(Submission, Option<Ticket>)> {
        let submission = self.submissions.get(id).await?;
        let ticket = match submission.ticket_id {
            Some(ticket_id) => Some(self.tickets.get(ticket_id).await?),
            None => None,
        };
        Ok((submission, ticket))
    }

    /// Point-in-time queue metrics.
    pub async fn queue_metrics(&self) -> Result<QueueMetrics> {
        queue_metrics::snapshot(self.submissions.as_ref(), chrono::Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_extracts_reference_and_normalizes() {
        let request = SubmissionRequest::from_json(json!({
            "title": "Laptop provisioning",
            "form_id": 1,
            "priority": "High",
            "client_reference": " abc ",
            "unknown": true,
        }))
        .unwrap();
        let (reference, payload) = request.normalize().unwrap();
        assert_eq!(reference.unwrap().as_str(), "abc");
        assert_eq!(payload["priority"], "high");
        assert!(!payload.contains_key("unknown"));
        assert!(!payload.contains_key("client_reference"));
    }

    #[test]
    fn blank_reference_counts_as_absent() {
        let request = SubmissionRequest::from_json(json!({"title": "x", "form_id": 2}))
            .unwrap()
            .client_reference("   ");
        let (reference, _) = request.normalize().unwrap();
        assert!(reference.is_none());
    }

    #[test]
    fn non_object_body_is_invalid() {
        assert!(matches!(
            SubmissionRequest::from_json(json!([1, 2])),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            SubmissionRequest::from_json(json!({"client_reference": 5})),
            Err(Error::Validation(_))
        ));
    }
}
