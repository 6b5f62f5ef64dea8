//! Queue metrics aggregation: per-state counts plus oldest in-flight age.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::QueueMetrics;
use crate::store::{StatusCounts, SubmissionStore};

/// Read-only snapshot of the queue as of `now`. No locking beyond the
/// store's normal read consistency.
pub async fn snapshot(store: &dyn SubmissionStore, now: DateTime<Utc>) -> Result<QueueMetrics> {
    let counts = store.status_counts().await?;
    let oldest = store.oldest_active_created_at().await?;
    Ok(aggregate(counts, oldest, now))
}

/// Combine counts with the oldest pending/processing creation time.
/// Clock skew never yields a negative age.
pub fn aggregate(
    counts: StatusCounts,
    oldest_active: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> QueueMetrics {
    let oldest_pending_seconds = oldest_active
        .map(|created| (now - created).num_seconds().max(0) as u64)
        .unwrap_or(0);
    QueueMetrics {
        pending: counts.pending,
        processing: counts.processing,
        completed: counts.completed,
        failed: counts.failed,
        oldest_pending_seconds,
    }
}
