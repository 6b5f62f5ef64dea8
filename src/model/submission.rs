//! Submission records and their lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::ticket::TicketId;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Newtype for submission IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionId(pub Uuid);

impl SubmissionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubmissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SubmissionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| Error::NotFound(format!("submission {s}")))
    }
}

/// Caller-supplied idempotency key. Unique across all submissions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientReference(String);

impl ClientReference {
    pub const MAX_LENGTH: usize = 128;

    /// Trim and validate a reference.
    pub fn new(reference: impl Into<String>) -> Result<Self> {
        let reference = reference.into().trim().to_string();
        if reference.is_empty() {
            return Err(Error::Validation("client_reference cannot be empty".into()));
        }
        if reference.chars().count() > Self::MAX_LENGTH {
            return Err(Error::Validation(format!(
                "client_reference exceeds {} characters",
                Self::MAX_LENGTH
            )));
        }
        Ok(Self(reference))
    }

    /// The reference assigned when the caller supplies none.
    pub fn generated(id: SubmissionId) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Recorded and waiting for a worker.
    Pending,
    /// A worker holds it and is materializing the ticket.
    Processing,
    /// Ticket created. Terminal.
    Completed,
    /// Retries exhausted or payload unusable. Terminal until resubmitted.
    Failed,
}

impl SubmissionStatus {
    pub const ALL: [SubmissionStatus; 4] = [
        SubmissionStatus::Pending,
        SubmissionStatus::Processing,
        SubmissionStatus::Completed,
        SubmissionStatus::Failed,
    ];

    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: SubmissionStatus) -> bool {
        use SubmissionStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, Failed)     // dispatch could not be enqueued
                | (Processing, Completed)
                | (Processing, Pending) // retry with backoff, or reaped
                | (Processing, Failed)
                | (Failed, Pending) // resubmitted with the same reference
        )
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(self, SubmissionStatus::Completed | SubmissionStatus::Failed)
    }

    /// Still waiting on a worker (counts toward queue latency).
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SubmissionStatus::Pending | SubmissionStatus::Processing
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Processing => "processing",
            SubmissionStatus::Completed => "completed",
            SubmissionStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubmissionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SubmissionStatus::Pending),
            "processing" => Ok(SubmissionStatus::Processing),
            "completed" => Ok(SubmissionStatus::Completed),
            "failed" => Ok(SubmissionStatus::Failed),
            other => Err(Error::Other(format!("unknown submission status: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// A durable ticket-creation request tracked through the async pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,

    /// Idempotency key. Retrying with the same reference never duplicates.
    pub client_reference: ClientReference,

    pub status: SubmissionStatus,

    /// Set only when `status == Completed`.
    pub ticket_id: Option<TicketId>,

    /// Validated, normalized request body.
    pub request_payload: Map<String, Value>,

    /// Non-empty only when `status == Failed`.
    pub error_message: String,

    /// Times this submission entered Processing since it was last reset.
    pub attempts: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Submission {
    /// A fresh pending submission. Without a reference, the id doubles as one.
    pub fn pending(reference: Option<ClientReference>, payload: Map<String, Value>) -> Self {
        let id = SubmissionId::new();
        let now = Utc::now();
        Self {
            id,
            client_reference: reference.unwrap_or_else(|| ClientReference::generated(id)),
            status: SubmissionStatus::Pending,
            ticket_id: None,
            request_payload: payload,
            error_message: String::new(),
            attempts: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// `ticket_id` iff completed, `error_message` only when failed,
    /// `completed_at` only in a terminal state.
    pub fn holds_invariants(&self) -> bool {
        let completed = self.status == SubmissionStatus::Completed;
        let failed = self.status == SubmissionStatus::Failed;
        completed == self.ticket_id.is_some()
            && (failed || self.error_message.is_empty())
            && (self.status.is_terminal() || self.completed_at.is_none())
    }
}

// ---------------------------------------------------------------------------
// Queue metrics
// ---------------------------------------------------------------------------

/// Point-in-time view of the submission queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    /// Age of the oldest pending or processing submission, 0 when idle.
    #[serde(rename = "oldestPendingSeconds")]
    pub oldest_pending_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_and_resubmit_paths_are_allowed() {
        use SubmissionStatus::*;
        assert!(Processing.can_transition_to(Pending));
        assert!(Failed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn reference_is_trimmed_and_bounded() {
        assert_eq!(ClientReference::new("  req-1 ").unwrap().as_str(), "req-1");
        assert!(ClientReference::new("   ").is_err());
        assert!(ClientReference::new("x".repeat(129)).is_err());
        assert!(ClientReference::new("x".repeat(128)).is_ok());
    }

    #[test]
    fn generated_reference_matches_id() {
        let submission = Submission::pending(None, Map::new());
        assert_eq!(
            submission.client_reference.as_str(),
            submission.id.to_string()
        );
        assert!(submission.holds_invariants());
    }

    #[test]
    fn metrics_serialize_latency_in_camel_case() {
        let json = serde_json::to_value(QueueMetrics {
            pending: 2,
            oldest_pending_seconds: 7,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json["pending"], 2);
        assert_eq!(json["oldestPendingSeconds"], 7);
    }
}
