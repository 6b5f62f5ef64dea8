//! At-least-once dispatch channel between intake and workers.
//!
//! A dispatch names one submission. Reading a dispatch hides it for the
//! visibility timeout; unless acked within that window it is delivered again.

pub mod memory;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::model::SubmissionId;

pub use memory::MemoryQueue;

/// A dispatch read from the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    /// Queue-assigned message id, used to ack.
    pub msg_id: i64,
    pub submission_id: SubmissionId,
    /// How many times this message has been read, including this one.
    pub read_count: u32,
}

#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Schedule a dispatch, visible after `delay`.
    async fn enqueue(&self, submission_id: SubmissionId, delay: Duration) -> Result<i64>;

    /// Take the next visible dispatch, hiding it for `visibility_timeout`.
    async fn dequeue(&self, visibility_timeout: Duration) -> Result<Option<Dispatch>>;

    /// Remove a handled dispatch.
    async fn ack(&self, dispatch: &Dispatch) -> Result<()>;

    /// Wait up to `max` for a hint that work may be available.
    async fn wait_ready(&self, max: Duration) {
        tokio::time::sleep(max).await;
    }
}

/// Message body carried by durable queues.
pub(crate) fn dispatch_payload(submission_id: SubmissionId) -> serde_json::Value {
    serde_json::json!({ "submission_id": submission_id })
}

/// Recover the submission id from a message body.
pub(crate) fn parse_dispatch_payload(payload: &serde_json::Value) -> Result<SubmissionId> {
    payload
        .get("submission_id")
        .and_then(|v| v.as_str())
        .and_then(|s| uuid::Uuid::parse_str(s).ok())
        .map(SubmissionId)
        .ok_or_else(|| {
            crate::error::Error::Queue("bad dispatch payload: missing submission_id".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_submission_id() {
        let id = SubmissionId::new();
        assert_eq!(parse_dispatch_payload(&dispatch_payload(id)).unwrap(), id);
        assert!(parse_dispatch_payload(&serde_json::json!({"task": "x"})).is_err());
    }
}
