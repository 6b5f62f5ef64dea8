//! Ticket entities produced by materialization.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::submission::SubmissionId;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(pub Uuid);

impl TicketId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TicketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = Error;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(Error::Validation(format!("invalid priority: {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Draft,
    #[default]
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Draft => "draft",
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
        }
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(TicketStatus::Draft),
            "open" => Ok(TicketStatus::Open),
            "in_progress" => Ok(TicketStatus::InProgress),
            "resolved" => Ok(TicketStatus::Resolved),
            "closed" => Ok(TicketStatus::Closed),
            other => Err(Error::Validation(format!("invalid status: {other:?}"))),
        }
    }
}

/// A persisted ticket. Owned independently of the submission that made it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub title: String,
    pub description: String,
    pub form_id: i64,
    pub requester_id: Option<i64>,
    pub assignee_id: Option<i64>,
    pub workflow_id: Option<i64>,
    pub priority: Priority,
    pub status: TicketStatus,
    pub payload: Map<String, Value>,
    pub due_date: Option<NaiveDate>,
    /// The submission this ticket was materialized from, if any.
    pub submission_id: Option<SubmissionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ticket creation arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTicket {
    pub title: String,
    pub description: String,
    pub form_id: i64,
    pub requester_id: Option<i64>,
    pub assignee_id: Option<i64>,
    pub workflow_id: Option<i64>,
    pub priority: Priority,
    pub status: TicketStatus,
    pub payload: Map<String, Value>,
    pub due_date: Option<NaiveDate>,
    pub submission_id: Option<SubmissionId>,
}

impl NewTicket {
    /// Stamp identity and timestamps onto the creation arguments.
    pub fn into_ticket(self) -> Ticket {
        let now = Utc::now();
        Ticket {
            id: TicketId::new(),
            title: self.title,
            description: self.description,
            form_id: self.form_id,
            requester_id: self.requester_id,
            assignee_id: self.assignee_id,
            workflow_id: self.workflow_id,
            priority: self.priority,
            status: self.status,
            payload: self.payload,
            due_date: self.due_date,
            submission_id: self.submission_id,
            created_at: now,
            updated_at: now,
        }
    }
}
