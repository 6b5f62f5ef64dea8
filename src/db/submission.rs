//! Submission store on Postgres.
//!
//! Claiming locks the row with `SELECT ... FOR UPDATE` inside a transaction.
//! Every other transition is an optimistic `UPDATE ... WHERE status = $from`,
//! fenced by `attempts` when it leaves Processing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{Db, map_unique_violation};
use crate::error::{Error, Result};
use crate::model::{ClientReference, Submission, SubmissionId, SubmissionStatus, TicketId};
use crate::store::{
    Claim, FailFrom, StatusCounts, SubmissionStore, conflict, stale_claim, validate_transition,
};

const COLUMNS: &str = "id, client_reference, status, ticket_id, request_payload, error_message, \
                       attempts, created_at, updated_at, completed_at";

/// [`SubmissionStore`] backed by the `ticket_submissions` table.
#[derive(Clone)]
pub struct PgSubmissionStore {
    db: Db,
}

impl PgSubmissionStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Turn the result of a guarded UPDATE into a submission, telling a lost
    /// race (reported as `lost`) apart from an unknown id.
    async fn guarded(
        &self,
        id: SubmissionId,
        lost: Error,
        row: Option<SubmissionRow>,
    ) -> Result<Submission> {
        if let Some(row) = row {
            return row.try_into_submission();
        }
        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM ticket_submissions WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.db.pool())
            .await?;
        match exists {
            Some(_) => Err(lost),
            None => Err(Error::NotFound(format!("submission {id}"))),
        }
    }
}

#[async_trait]
impl SubmissionStore for PgSubmissionStore {
    async fn insert(&self, submission: &Submission) -> Result<()> {
        sqlx::query(
            "INSERT INTO ticket_submissions (id, client_reference, status, ticket_id, request_payload, error_message, attempts, created_at, updated_at, completed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(submission.id.0)
        .bind(submission.client_reference.as_str())
        .bind(submission.status.as_str())
        .bind(submission.ticket_id.map(|t| t.0))
        .bind(Value::Object(submission.request_payload.clone()))
        .bind(&submission.error_message)
        .bind(submission.attempts as i32)
        .bind(submission.created_at)
        .bind(submission.updated_at)
        .bind(submission.completed_at)
        .execute(self.db.pool())
        .await
        .map_err(|e| map_unique_violation(e, submission.client_reference.as_str()))?;
        Ok(())
    }

    async fn get(&self, id: SubmissionId) -> Result<Submission> {
        let sql = format!("SELECT {COLUMNS} FROM ticket_submissions WHERE id = $1");
        let row: Option<SubmissionRow> = sqlx::query_as(&sql)
            .bind(id.0)
            .fetch_optional(self.db.pool())
            .await?;
        row.ok_or_else(|| Error::NotFound(format!("submission {id}")))?
            .try_into_submission()
    }

    async fn find_by_reference(&self, reference: &ClientReference) -> Result<Option<Submission>> {
        let sql = format!("SELECT {COLUMNS} FROM ticket_submissions WHERE client_reference = $1");
        let row: Option<SubmissionRow> = sqlx::query_as(&sql)
            .bind(reference.as_str())
            .fetch_optional(self.db.pool())
            .await?;
        row.map(SubmissionRow::try_into_submission).transpose()
    }

    async fn claim(&self, id: SubmissionId) -> Result<Claim> {
        let mut tx = self.db.pool().begin().await?;

        let select = format!("SELECT {COLUMNS} FROM ticket_submissions WHERE id = $1 FOR UPDATE");
        let row: Option<SubmissionRow> = sqlx::query_as(&select)
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await?;
        let current = row
            .ok_or_else(|| Error::NotFound(format!("submission {id}")))?
            .try_into_submission()?;

        let claim = match current.status {
            SubmissionStatus::Completed => Claim::AlreadyCompleted(current),
            SubmissionStatus::Processing => Claim::AlreadyProcessing(current),
            SubmissionStatus::Failed => Claim::Failed(current),
            SubmissionStatus::Pending => {
                let update = format!(
                    "UPDATE ticket_submissions SET status = 'processing', attempts = attempts + 1, updated_at = $2
                     WHERE id = $1 RETURNING {COLUMNS}"
                );
                let row: SubmissionRow = sqlx::query_as(&update)
                    .bind(id.0)
                    .bind(Utc::now())
                    .fetch_one(&mut *tx)
                    .await?;
                Claim::Claimed(row.try_into_submission()?)
            }
        };

        tx.commit().await?;
        Ok(claim)
    }

    async fn complete(
        &self,
        id: SubmissionId,
        claimed_attempts: u32,
        ticket_id: TicketId,
    ) -> Result<Submission> {
        let sql = format!(
            "UPDATE ticket_submissions SET status = 'completed', ticket_id = $2, error_message = '', completed_at = $3, updated_at = $3
             WHERE id = $1 AND status = 'processing' AND attempts = $4 RETURNING {COLUMNS}"
        );
        let row: Option<SubmissionRow> = sqlx::query_as(&sql)
            .bind(id.0)
            .bind(ticket_id.0)
            .bind(Utc::now())
            .bind(attempts_param(claimed_attempts))
            .fetch_optional(self.db.pool())
            .await?;
        self.guarded(id, stale_claim(id, claimed_attempts), row).await
    }

    async fn release(&self, id: SubmissionId, claimed_attempts: u32) -> Result<Submission> {
        let sql = format!(
            "UPDATE ticket_submissions SET status = 'pending', updated_at = $2
             WHERE id = $1 AND status = 'processing' AND attempts = $3 RETURNING {COLUMNS}"
        );
        let row: Option<SubmissionRow> = sqlx::query_as(&sql)
            .bind(id.0)
            .bind(Utc::now())
            .bind(attempts_param(claimed_attempts))
            .fetch_optional(self.db.pool())
            .await?;
        self.guarded(id, stale_claim(id, claimed_attempts), row).await
    }

    async fn fail(&self, id: SubmissionId, from: FailFrom, error: &str) -> Result<Submission> {
        validate_transition(from.status(), SubmissionStatus::Failed)?;
        // A NULL fence matches any attempt count.
        let sql = format!(
            "UPDATE ticket_submissions SET status = 'failed', ticket_id = NULL, error_message = $2, completed_at = $3, updated_at = $3
             WHERE id = $1 AND status = $4 AND ($5::INT IS NULL OR attempts = $5) RETURNING {COLUMNS}"
        );
        let row: Option<SubmissionRow> = sqlx::query_as(&sql)
            .bind(id.0)
            .bind(error)
            .bind(Utc::now())
            .bind(from.status().as_str())
            .bind(from.claimed_attempts().map(attempts_param))
            .fetch_optional(self.db.pool())
            .await?;
        let lost = match from {
            FailFrom::Pending => conflict(id, SubmissionStatus::Pending),
            FailFrom::Claim(attempts) => stale_claim(id, attempts),
        };
        self.guarded(id, lost, row).await
    }

    async fn reset(&self, id: SubmissionId, payload: Map<String, Value>) -> Result<Submission> {
        let sql = format!(
            "UPDATE ticket_submissions SET status = 'pending', ticket_id = NULL, error_message = '', completed_at = NULL,
                    attempts = 0, request_payload = $2, updated_at = $3
             WHERE id = $1 AND status = 'failed' RETURNING {COLUMNS}"
        );
        let row: Option<SubmissionRow> = sqlx::query_as(&sql)
            .bind(id.0)
            .bind(Value::Object(payload))
            .bind(Utc::now())
            .fetch_optional(self.db.pool())
            .await?;
        self.guarded(id, conflict(id, SubmissionStatus::Failed), row).await
    }

    async fn reset_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<SubmissionId>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "UPDATE ticket_submissions SET status = 'pending', updated_at = $2
             WHERE status = 'processing' AND updated_at < $1
             RETURNING id",
        )
        .bind(cutoff)
        .bind(Utc::now())
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows.into_iter().map(|(id,)| SubmissionId(id)).collect())
    }

    async fn status_counts(&self) -> Result<StatusCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM ticket_submissions GROUP BY status")
                .fetch_all(self.db.pool())
                .await?;
        let mut counts = StatusCounts::default();
        for (status, total) in rows {
            counts.add(status.parse()?, total as u64);
        }
        Ok(counts)
    }

    async fn oldest_active_created_at(&self) -> Result<Option<DateTime<Utc>>> {
        let row: (Option<DateTime<Utc>>,) = sqlx::query_as(
            "SELECT MIN(created_at) FROM ticket_submissions WHERE status IN ('pending', 'processing')",
        )
        .fetch_one(self.db.pool())
        .await?;
        Ok(row.0)
    }
}

/// `attempts` is an INT column.
fn attempts_param(attempts: u32) -> i32 {
    i32::try_from(attempts).unwrap_or(i32::MAX)
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct SubmissionRow {
    id: Uuid,
    client_reference: String,
    status: String,
    ticket_id: Option<Uuid>,
    request_payload: Value,
    error_message: String,
    attempts: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl SubmissionRow {
    fn try_into_submission(self) -> Result<Submission> {
        let Value::Object(request_payload) = self.request_payload else {
            return Err(Error::Other(format!(
                "submission {} has a non-object payload",
                self.id
            )));
        };
        Ok(Submission {
            id: SubmissionId(self.id),
            client_reference: ClientReference::new(self.client_reference)?,
            status: self.status.parse()?,
            ticket_id: self.ticket_id.map(TicketId),
            request_payload,
            error_message: self.error_message,
            attempts: self.attempts.max(0) as u32,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}
