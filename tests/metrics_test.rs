//! Queue metrics over a known population of submissions.

mod support;

use chrono::{TimeDelta, Utc};
use serde_json::Map;
use support::Harness;
use ticketq::model::{ClientReference, QueueMetrics, Submission, SubmissionStatus, TicketId};
use ticketq::store::SubmissionStore;

fn submission(reference: &str, status: SubmissionStatus, age_secs: i64) -> Submission {
    let mut s = Submission::pending(Some(ClientReference::new(reference).unwrap()), Map::new());
    let created = Utc::now() - TimeDelta::seconds(age_secs);
    s.status = status;
    s.created_at = created;
    s.updated_at = created;
    match status {
        SubmissionStatus::Completed => {
            s.ticket_id = Some(TicketId::new());
            s.completed_at = Some(created);
        }
        SubmissionStatus::Failed => {
            s.error_message = "boom".into();
            s.completed_at = Some(created);
        }
        _ => {}
    }
    s
}

#[tokio::test]
async fn empty_queue_reports_zeroes() {
    let h = Harness::new();
    assert_eq!(h.engine.queue_metrics().await.unwrap(), QueueMetrics::default());
}

#[tokio::test]
async fn counts_match_population_and_oldest_active_age() {
    let h = Harness::new();
    let population = [
        ("p1", SubmissionStatus::Pending, 30),
        ("p2", SubmissionStatus::Pending, 120),
        ("r1", SubmissionStatus::Processing, 60),
        ("c1", SubmissionStatus::Completed, 900),
        ("c2", SubmissionStatus::Completed, 10),
        ("c3", SubmissionStatus::Completed, 5),
        ("f1", SubmissionStatus::Failed, 600),
    ];
    for (reference, status, age) in population {
        h.submissions
            .insert(&submission(reference, status, age))
            .await
            .unwrap();
    }

    let metrics = h.engine.queue_metrics().await.unwrap();
    assert_eq!(metrics.pending, 2);
    assert_eq!(metrics.processing, 1);
    assert_eq!(metrics.completed, 3);
    assert_eq!(metrics.failed, 1);
    // Oldest pending-or-processing is p2; terminal ones do not count.
    assert!((120..125).contains(&metrics.oldest_pending_seconds));
}

#[tokio::test]
async fn only_terminal_submissions_means_no_pending_age() {
    let h = Harness::new();
    h.submissions
        .insert(&submission("c1", SubmissionStatus::Completed, 3_600))
        .await
        .unwrap();
    h.submissions
        .insert(&submission("f1", SubmissionStatus::Failed, 7_200))
        .await
        .unwrap();

    let metrics = h.engine.queue_metrics().await.unwrap();
    assert_eq!(metrics.completed, 1);
    assert_eq!(metrics.failed, 1);
    assert_eq!(metrics.oldest_pending_seconds, 0);
}

#[test]
fn metrics_serialize_with_camel_case_age() {
    let metrics = QueueMetrics {
        pending: 1,
        oldest_pending_seconds: 42,
        ..QueueMetrics::default()
    };
    let json = serde_json::to_value(metrics).unwrap();
    assert_eq!(json["oldestPendingSeconds"], 42);
    assert_eq!(json["pending"], 1);
    assert!(json.get("oldest_pending_seconds").is_none());
}
