//! Submission handlers and their response types.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ApiError;
use crate::engine::{Engine, SubmissionRequest, SubmitResult};
use crate::error::Error;
use crate::model::{
    ClientReference, QueueMetrics, Submission, SubmissionId, SubmissionStatus, Ticket, TicketId,
};

/// What clients see of a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionView {
    pub id: SubmissionId,
    pub client_reference: ClientReference,
    pub status: SubmissionStatus,
    pub ticket_id: Option<TicketId>,
    pub ticket: Option<Ticket>,
    pub error_message: String,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SubmissionView {
    pub fn new(submission: Submission, ticket: Option<Ticket>) -> Self {
        Self {
            id: submission.id,
            client_reference: submission.client_reference,
            status: submission.status,
            ticket_id: submission.ticket_id,
            ticket,
            error_message: submission.error_message,
            attempts: submission.attempts,
            created_at: submission.created_at,
            updated_at: submission.updated_at,
            completed_at: submission.completed_at,
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// 202 while the submission is in flight, 200 when it was already completed.
pub(super) async fn create(
    State(engine): State<Engine>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<SubmissionView>)> {
    let value: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| Error::Validation(format!("request body is not valid JSON: {e}")))?;
    let request = SubmissionRequest::from_json(value)?;

    match engine.submit(request).await? {
        SubmitResult::AlreadyCompleted(submission) => {
            let (submission, ticket) = engine.get_with_ticket(submission.id).await?;
            Ok((StatusCode::OK, Json(SubmissionView::new(submission, ticket))))
        }
        accepted => Ok((
            StatusCode::ACCEPTED,
            Json(SubmissionView::new(accepted.into_submission(), None)),
        )),
    }
}

pub(super) async fn show(
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> ApiResult<Json<SubmissionView>> {
    let id: SubmissionId = id.parse()?;
    let (submission, ticket) = engine.get_with_ticket(id).await?;
    Ok(Json(SubmissionView::new(submission, ticket)))
}

pub(super) async fn queue_metrics(State(engine): State<Engine>) -> ApiResult<Json<QueueMetrics>> {
    Ok(Json(engine.queue_metrics().await?))
}
