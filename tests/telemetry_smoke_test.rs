//! Smoke tests for OTLP export.
//!
//! These need an OTLP collector on localhost:4317 backed by Tempo
//! (localhost:3200) and Prometheus (localhost:9090).
//!
//! Run with:
//! ```sh
//! cargo test --test telemetry_smoke_test -- --ignored --nocapture
//! ```

mod support;

use std::sync::OnceLock;
use std::time::Duration;

use support::{Harness, no_backoff, with_reference};
use ticketq::telemetry::{TelemetryConfig, TelemetryGuard, init_telemetry};

static TELEMETRY: OnceLock<TelemetryGuard> = OnceLock::new();

fn ensure_telemetry() -> &'static TelemetryGuard {
    TELEMETRY.get_or_init(|| {
        init_telemetry(TelemetryConfig {
            endpoint: Some("http://localhost:4317".to_string()),
            service_name: "ticketq-smoke-test".to_string(),
            log_level: "info".to_string(),
        })
        .expect("failed to init telemetry")
    })
}

/// Force-flush all providers and give backends time to ingest.
async fn flush_and_wait(guard: &TelemetryGuard) {
    guard.force_flush();
    tokio::time::sleep(Duration::from_secs(8)).await;
}

/// Push one submission through intake and a worker so every signal fires.
async fn run_one_submission() {
    let h = Harness::with_ticket_failures(1);
    let worker = h.worker(no_backoff(2));
    h.engine.submit(with_reference("smoke")).await.unwrap();
    h.drain(&worker).await;
}

#[test]
#[ignore]
fn smoke_traces() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let guard = ensure_telemetry();
        run_one_submission().await;
        flush_and_wait(guard).await;

        let client = reqwest::Client::new();
        let resp = client
            .get("http://localhost:3200/api/search")
            .query(&[("tags", "service.name=ticketq-smoke-test"), ("limit", "5")])
            .send()
            .await
            .expect("failed to query Tempo");
        assert!(resp.status().is_success(), "Tempo query failed: {}", resp.status());

        let body: serde_json::Value = resp.json().await.expect("failed to parse Tempo response");
        let traces = body["traces"].as_array();
        assert!(
            traces.is_some_and(|t| !t.is_empty()),
            "expected traces in Tempo, got: {body}"
        );
    });
}

#[test]
#[ignore]
fn smoke_metrics() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let guard = ensure_telemetry();
        run_one_submission().await;
        flush_and_wait(guard).await;

        let client = reqwest::Client::new();
        for metric in [
            "ticketq_submissions_received_total",
            "ticketq_submissions_state_transitions_total",
            "ticketq_submissions_retries_total",
        ] {
            let resp = client
                .get("http://localhost:9090/api/v1/query")
                .query(&[("query", metric)])
                .send()
                .await
                .expect("failed to query Prometheus");
            assert!(resp.status().is_success(), "Prometheus query failed: {}", resp.status());

            let body: serde_json::Value = resp
                .json()
                .await
                .expect("failed to parse Prometheus response");
            let results = body["data"]["result"].as_array();
            assert!(
                results.is_some_and(|r| !r.is_empty()),
                "expected {metric} in Prometheus, got: {body}"
            );
        }
    });
}
