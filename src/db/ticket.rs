//! Ticket store on Postgres.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::Db;
use crate::error::{Error, Result};
use crate::model::{NewTicket, SubmissionId, Ticket, TicketId};
use crate::store::TicketStore;

const COLUMNS: &str = "id, title, description, status, priority, form_id, requester_id, assignee_id, \
                       workflow_id, payload, due_date, submission_id, created_at, updated_at";

/// [`TicketStore`] backed by the `tickets` table.
#[derive(Clone)]
pub struct PgTicketStore {
    db: Db,
}

impl PgTicketStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TicketStore for PgTicketStore {
    async fn create(&self, new: NewTicket) -> Result<Ticket> {
        let ticket = new.into_ticket();
        // A single INSERT: either the whole ticket lands or nothing does.
        let sql = format!(
            "INSERT INTO tickets ({COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
             ON CONFLICT (submission_id) DO NOTHING
             RETURNING {COLUMNS}"
        );
        let inserted: Option<TicketRow> = sqlx::query_as(&sql)
            .bind(ticket.id.0)
            .bind(&ticket.title)
            .bind(&ticket.description)
            .bind(ticket.status.as_str())
            .bind(ticket.priority.as_str())
            .bind(ticket.form_id)
            .bind(ticket.requester_id)
            .bind(ticket.assignee_id)
            .bind(ticket.workflow_id)
            .bind(Value::Object(ticket.payload.clone()))
            .bind(ticket.due_date)
            .bind(ticket.submission_id.map(|s| s.0))
            .bind(ticket.created_at)
            .fetch_optional(self.db.pool())
            .await?;

        if let Some(row) = inserted {
            return row.try_into_ticket();
        }
        // Conflict on submission_id: this submission was already materialized.
        let submission_id = ticket
            .submission_id
            .ok_or_else(|| Error::Other("ticket insert returned no row".to_string()))?;
        self.find_by_submission(submission_id)
            .await?
            .ok_or_else(|| Error::Conflict(format!("ticket for submission {submission_id} vanished")))
    }

    async fn get(&self, id: TicketId) -> Result<Ticket> {
        let sql = format!("SELECT {COLUMNS} FROM tickets WHERE id = $1");
        let row: Option<TicketRow> = sqlx::query_as(&sql)
            .bind(id.0)
            .fetch_optional(self.db.pool())
            .await?;
        row.ok_or_else(|| Error::NotFound(format!("ticket {id}")))?
            .try_into_ticket()
    }

    async fn find_by_submission(&self, id: SubmissionId) -> Result<Option<Ticket>> {
        let sql = format!("SELECT {COLUMNS} FROM tickets WHERE submission_id = $1");
        let row: Option<TicketRow> = sqlx::query_as(&sql)
            .bind(id.0)
            .fetch_optional(self.db.pool())
            .await?;
        row.map(TicketRow::try_into_ticket).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    title: String,
    description: String,
    status: String,
    priority: String,
    form_id: i64,
    requester_id: Option<i64>,
    assignee_id: Option<i64>,
    workflow_id: Option<i64>,
    payload: Value,
    due_date: Option<NaiveDate>,
    submission_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TicketRow {
    fn try_into_ticket(self) -> Result<Ticket> {
        let payload = match self.payload {
            Value::Object(map) => map,
            Value::Null => Default::default(),
            _ => return Err(Error::Other(format!("ticket {} has a non-object payload", self.id))),
        };
        Ok(Ticket {
            id: TicketId(self.id),
            title: self.title,
            description: self.description,
            form_id: self.form_id,
            requester_id: self.requester_id,
            assignee_id: self.assignee_id,
            workflow_id: self.workflow_id,
            priority: self.priority.parse()?,
            status: self.status.parse()?,
            payload,
            due_date: self.due_date,
            submission_id: self.submission_id.map(SubmissionId),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
