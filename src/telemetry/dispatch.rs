//! Dispatch span helpers.
//!
//! Provides span creation and state-transition recording for submissions
//! flowing through a worker.

use tracing::Span;

use crate::model::{SubmissionId, SubmissionStatus};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

/// Start a span covering one dispatch of one submission.
///
/// `submission.state` is declared empty and filled by
/// [`record_state_transition`].
pub fn start_dispatch_span(submission_id: SubmissionId) -> Span {
    tracing::info_span!(
        "submission.dispatch",
        "submission.id" = %submission_id,
        "submission.state" = tracing::field::Empty,
    )
}

/// Record a state transition on the span and in the transition counter.
pub fn record_state_transition(span: &Span, from: SubmissionStatus, to: SubmissionStatus) {
    span.record("submission.state", to.as_str());
    span.in_scope(|| {
        tracing::info!(from = from.as_str(), to = to.as_str(), "state_transition");
    });
    metrics::state_transitions().add(
        1,
        &[
            KeyValue::new("from", from.as_str()),
            KeyValue::new("to", to.as_str()),
        ],
    );
}
