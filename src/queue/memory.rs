//! In-process dispatch queue with delayed delivery and visibility timeouts.

use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{Dispatch, DispatchQueue};
use crate::error::Result;
use crate::model::SubmissionId;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

struct Entry {
    msg_id: i64,
    submission_id: SubmissionId,
    visible_at: Instant,
    read_count: u32,
}

/// Dispatch queue living in process memory. Messages survive handler
/// crashes (they reappear after the visibility timeout) but not restarts.
pub struct MemoryQueue {
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicI64,
    ready: Notify,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
            ready: Notify::new(),
        }
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages not yet acked, visible or not.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn record(operation: &'static str) {
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("queue", "memory"),
            KeyValue::new("operation", operation),
        ],
    );
}

#[async_trait]
impl DispatchQueue for MemoryQueue {
    async fn enqueue(&self, submission_id: SubmissionId, delay: Duration) -> Result<i64> {
        let msg_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().await.push(Entry {
            msg_id,
            submission_id,
            visible_at: Instant::now() + delay,
            read_count: 0,
        });
        if delay.is_zero() {
            self.ready.notify_one();
        }
        record("send");
        Ok(msg_id)
    }

    async fn dequeue(&self, visibility_timeout: Duration) -> Result<Option<Dispatch>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let next = entries
            .iter_mut()
            .filter(|e| e.visible_at <= now)
            .min_by_key(|e| (e.visible_at, e.msg_id));

        let Some(entry) = next else {
            record("read_empty");
            return Ok(None);
        };
        entry.visible_at = now + visibility_timeout;
        entry.read_count += 1;
        record("read");
        Ok(Some(Dispatch {
            msg_id: entry.msg_id,
            submission_id: entry.submission_id,
            read_count: entry.read_count,
        }))
    }

    async fn ack(&self, dispatch: &Dispatch) -> Result<()> {
        self.entries
            .lock()
            .await
            .retain(|e| e.msg_id != dispatch.msg_id);
        record("archive");
        Ok(())
    }

    async fn wait_ready(&self, max: Duration) {
        let _ = tokio::time::timeout(max, self.ready.notified()).await;
    }
}
