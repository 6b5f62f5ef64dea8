//! HTTP surface against a live axum server on an ephemeral port.

mod support;

use reqwest::StatusCode;
use serde_json::{Value, json};
use std::time::Duration;
use support::{Harness, no_backoff};
use ticketq::engine::spawn_workers;
use ticketq::http;
use tokio::net::TcpListener;

async fn spawn_server(h: &Harness) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let engine = h.engine.clone();
    let shutdown = h.shutdown.clone();
    tokio::spawn(async move { http::serve(listener, engine, shutdown).await });
    format!("http://{addr}")
}

async fn post(client: &reqwest::Client, base: &str, body: Value) -> (StatusCode, Value) {
    let resp = client
        .post(format!("{base}/submissions"))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status();
    (status, resp.json().await.unwrap())
}

async fn get(client: &reqwest::Client, url: String) -> (StatusCode, Value) {
    let resp = client.get(url).send().await.unwrap();
    let status = resp.status();
    (status, resp.json().await.unwrap())
}

#[tokio::test]
async fn submission_is_accepted_then_completes_with_ticket() {
    let h = Harness::new();
    let base = spawn_server(&h).await;
    let client = reqwest::Client::new();

    let (status, body) = post(
        &client,
        &base,
        json!({"title": "Laptop provisioning", "form_id": 1, "priority": "high"}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["client_reference"], body["id"]);
    assert!(body["ticket"].is_null());
    let id = body["id"].as_str().unwrap().to_string();

    let _pool = spawn_workers(&h.worker(no_backoff(3)), 2);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let done = loop {
        let (status, body) = get(&client, format!("{base}/submissions/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] == "completed" {
            break body;
        }
        assert!(tokio::time::Instant::now() < deadline, "never completed: {body}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    assert_eq!(done["ticket"]["priority"], "high");
    assert_eq!(done["ticket"]["title"], "Laptop provisioning");
    assert_eq!(done["ticket_id"], done["ticket"]["id"]);
    assert_eq!(done["error_message"], "");
    assert!(done["completed_at"].is_string());
    h.shutdown.signal();
}

#[tokio::test]
async fn duplicate_reference_yields_one_ticket_and_200_once_completed() {
    let h = Harness::new();
    let base = spawn_server(&h).await;
    let client = reqwest::Client::new();
    let body = json!({"title": "Badge", "form_id": 2, "client_reference": "dup-1"});

    let (first_status, first) = post(&client, &base, body.clone()).await;
    let (second_status, second) = post(&client, &base, body.clone()).await;
    assert_eq!(first_status, StatusCode::ACCEPTED);
    assert_eq!(second_status, StatusCode::ACCEPTED);
    assert_eq!(first["id"], second["id"]);
    assert_eq!(first["client_reference"], "dup-1");

    let worker = h.worker(no_backoff(3));
    h.drain(&worker).await;
    assert_eq!(h.tickets.stored().await.len(), 1);

    let (status, third) = post(&client, &base, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(third["id"], first["id"]);
    assert_eq!(third["status"], "completed");
    assert_eq!(third["ticket"]["title"], "Badge");
    assert_eq!(h.tickets.stored().await.len(), 1);
}

#[tokio::test]
async fn invalid_bodies_are_rejected_with_400() {
    let h = Harness::new();
    let base = spawn_server(&h).await;
    let client = reqwest::Client::new();

    let (status, body) = post(&client, &base, json!({"form_id": 1})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("title"));

    let (status, _) = post(&client, &base, json!(["not", "an", "object"])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let resp = client
        .post(format!("{base}/submissions"))
        .header("content-type", "application/json")
        .body("{\"title\":")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    assert!(h.submissions.all().await.is_empty());
}

#[tokio::test]
async fn unknown_or_malformed_ids_are_404() {
    let h = Harness::new();
    let base = spawn_server(&h).await;
    let client = reqwest::Client::new();

    let (status, body) = get(
        &client,
        format!("{base}/submissions/{}", uuid::Uuid::new_v4()),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = get(&client, format!("{base}/submissions/not-a-uuid")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn queue_metrics_and_health() {
    let h = Harness::new();
    let base = spawn_server(&h).await;
    let client = reqwest::Client::new();

    post(&client, &base, json!({"title": "Desk", "form_id": 3})).await;
    let (status, metrics) = get(&client, format!("{base}/queue-metrics")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metrics["pending"], 1);
    assert_eq!(metrics["processing"], 0);
    assert_eq!(metrics["completed"], 0);
    assert_eq!(metrics["failed"], 0);
    assert!(metrics["oldestPendingSeconds"].is_u64());

    let (status, health) = get(&client, format!("{base}/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");
}
