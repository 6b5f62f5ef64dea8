//! pgmq dispatch queue via direct SQLx.
//!
//! Calls pgmq's SQL functions: pgmq.create, pgmq.send, pgmq.read,
//! pgmq.archive. Each send is followed by a NOTIFY on `<queue>_ready` so idle
//! workers wake without waiting out their poll interval.

use async_trait::async_trait;
use opentelemetry::KeyValue;
use sqlx::postgres::PgListener;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::Db;
use crate::error::{Error, Result};
use crate::model::SubmissionId;
use crate::queue::{Dispatch, DispatchQueue, dispatch_payload, parse_dispatch_payload};
use crate::telemetry::metrics;

/// [`DispatchQueue`] on a pgmq queue.
pub struct PgmqQueue {
    db: Db,
    queue_name: String,
    channel: String,
    ready: Arc<Notify>,
    listener: JoinHandle<()>,
}

impl PgmqQueue {
    /// Create the queue if needed and start listening for readiness hints.
    pub async fn connect(db: Db, queue_name: impl Into<String>) -> Result<Self> {
        let queue_name = queue_name.into();
        let channel = format!("{queue_name}_ready");

        sqlx::query("SELECT pgmq.create($1)")
            .bind(&queue_name)
            .execute(db.pool())
            .await?;
        record(&queue_name, "create");

        let mut listener = PgListener::connect_with(db.pool()).await?;
        listener.listen(&channel).await?;

        let ready = Arc::new(Notify::new());
        let listener = tokio::spawn(forward_notifications(listener, ready.clone()));

        Ok(Self {
            db,
            queue_name,
            channel,
            ready,
            listener,
        })
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Move a message to the archive table, kept for audit.
    async fn archive(&self, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .bind(&self.queue_name)
            .bind(msg_id)
            .execute(self.db.pool())
            .await?;
        record(&self.queue_name, "archive");
        Ok(())
    }
}

impl Drop for PgmqQueue {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn forward_notifications(mut listener: PgListener, ready: Arc<Notify>) {
    loop {
        match listener.recv().await {
            Ok(n) => {
                debug!(channel = n.channel(), "dispatch ready");
                ready.notify_waiters();
            }
            Err(e) => {
                // recv reconnects on the next call
                warn!("PgListener error: {e}, falling back to poll");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// pgmq takes whole seconds; round sub-second delays up.
fn whole_seconds(d: Duration) -> i32 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    i32::try_from(secs).unwrap_or(i32::MAX)
}

fn record(queue: &str, operation: &'static str) {
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("queue", queue.to_string()),
            KeyValue::new("operation", operation),
        ],
    );
}

#[async_trait]
impl DispatchQueue for PgmqQueue {
    async fn enqueue(&self, submission_id: SubmissionId, delay: Duration) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, $3)")
            .bind(&self.queue_name)
            .bind(dispatch_payload(submission_id))
            .bind(whole_seconds(delay))
            .fetch_one(self.db.pool())
            .await
            .map_err(|e| Error::Queue(format!("pgmq send failed: {e}")))?;
        record(&self.queue_name, "send");

        if delay.is_zero() {
            // Best effort; workers still poll.
            if let Err(e) = sqlx::query("SELECT pg_notify($1, $2)")
                .bind(&self.channel)
                .bind(submission_id.to_string())
                .execute(self.db.pool())
                .await
            {
                warn!(submission_id = %submission_id, "pg_notify failed: {e}");
            }
        }
        Ok(row.0)
    }

    async fn dequeue(&self, visibility_timeout: Duration) -> Result<Option<Dispatch>> {
        let row: Option<(i64, i32, serde_json::Value)> =
            sqlx::query_as("SELECT msg_id, read_ct, message FROM pgmq.read($1, $2, 1)")
                .bind(&self.queue_name)
                .bind(whole_seconds(visibility_timeout).max(1))
                .fetch_optional(self.db.pool())
                .await?;
        record(
            &self.queue_name,
            if row.is_some() { "read" } else { "read_empty" },
        );

        let Some((msg_id, read_ct, message)) = row else {
            return Ok(None);
        };
        match parse_dispatch_payload(&message) {
            Ok(submission_id) => Ok(Some(Dispatch {
                msg_id,
                submission_id,
                read_count: read_ct.max(0) as u32,
            })),
            Err(e) => {
                // Unreadable forever; archive it rather than redeliver.
                warn!(msg_id, "archiving malformed dispatch: {e}");
                self.archive(msg_id).await?;
                Ok(None)
            }
        }
    }

    async fn ack(&self, dispatch: &Dispatch) -> Result<()> {
        self.archive(dispatch.msg_id).await
    }

    async fn wait_ready(&self, max: Duration) {
        let _ = tokio::time::timeout(max, self.ready.notified()).await;
    }
}
