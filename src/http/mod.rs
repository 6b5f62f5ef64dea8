//! HTTP surface over the submission engine.
//!
//! - `POST /submissions`: validate, deduplicate and dispatch a request.
//! - `GET /submissions/{id}`: current state, with the ticket once completed.
//! - `GET /queue-metrics`: per-state counts and oldest in-flight age.
//! - `GET /health`: liveness.

mod submissions;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::engine::{Engine, Shutdown, signalled};
use crate::error::{Error, Result};

pub use submissions::SubmissionView;

/// Build the router. State is the engine handle.
pub fn router(engine: Engine) -> Router {
    Router::new()
        .route("/submissions", post(submissions::create))
        .route("/submissions/{id}", get(submissions::show))
        .route("/queue-metrics", get(submissions::queue_metrics))
        .route("/health", get(health))
        .with_state(engine)
}

/// Serve until shutdown is signalled, then drain in-flight requests.
pub async fn serve(listener: TcpListener, engine: Engine, shutdown: Shutdown) -> Result<()> {
    let mut rx = shutdown.subscribe();
    info!(addr = ?listener.local_addr().ok(), "http listening");
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(async move { signalled(&mut rx).await })
        .await?;
    info!("http server stopped");
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Error response: `{"error": "..."}` with a status derived from the error.
pub(crate) struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Validation(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
