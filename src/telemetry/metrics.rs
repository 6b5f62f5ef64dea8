//! Metric instrument factories for ticketq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"ticketq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("ticketq")
}

/// Counter: submissions received at intake.
/// Labels: `outcome` ("created" | "accepted" | "already_completed" | "invalid" | "error").
pub fn submissions_received() -> Counter<u64> {
    meter()
        .u64_counter("ticketq.submissions.received")
        .with_description("Number of ticket submissions received")
        .build()
}

/// Counter: submission state transitions.
/// Labels: `from`, `to`.
pub fn state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("ticketq.submissions.state_transitions")
        .with_description("Number of submission state transitions")
        .build()
}

/// Counter: dispatch queue operations (send, read, archive).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("ticketq.queue.operations")
        .with_description("Number of dispatch queue operations")
        .build()
}

/// Histogram: time spent materializing a ticket, in milliseconds.
/// Labels: `result` ("ok" | "error").
pub fn materialize_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("ticketq.materialize.duration_ms")
        .with_description("Ticket materialization duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: retries scheduled after a failed materialization.
pub fn retries_scheduled() -> Counter<u64> {
    meter()
        .u64_counter("ticketq.submissions.retries")
        .with_description("Delayed redeliveries scheduled after a failure")
        .build()
}

/// Counter: submissions moved back to pending after stalling in processing.
pub fn submissions_reaped() -> Counter<u64> {
    meter()
        .u64_counter("ticketq.submissions.reaped")
        .with_description("Stale processing submissions returned to pending")
        .build()
}
