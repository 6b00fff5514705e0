//! HTTP server for health, readiness, and metrics endpoints

use std::net::SocketAddr;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use netbatch::metrics::encode_metrics;
use netbatch::PipelineState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub state: PipelineState,
}

/// Shared state for health endpoints
#[derive(Clone)]
pub struct ServerState {
    pub pipeline: watch::Receiver<PipelineState>,
}

impl ServerState {
    pub fn new(pipeline: watch::Receiver<PipelineState>) -> Self {
        Self { pipeline }
    }

    fn state(&self) -> PipelineState {
        *self.pipeline.borrow()
    }
}

/// Health endpoint - 200 while the process is serving
async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        state: state.state(),
    })
}

/// Ready endpoint - 200 only while the pipeline accepts messages
async fn ready(State(state): State<ServerState>) -> (StatusCode, Json<HealthResponse>) {
    let current = state.state();
    let (code, status) = match current {
        PipelineState::Running => (StatusCode::OK, "ready"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "not_ready"),
    };
    (
        code,
        Json(HealthResponse {
            status,
            state: current,
        }),
    )
}

/// Metrics endpoint - returns Prometheus text format
async fn metrics() -> impl IntoResponse {
    match encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {}", e),
        ),
    }
}

pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled
pub async fn run_server(
    addr: SocketAddr,
    state: ServerState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = create_router(state);
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Health server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn router(state: PipelineState) -> Router {
        let (_tx, rx) = watch::channel(state);
        create_router(ServerState::new(rx))
    }

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_health_returns_ok_in_any_state() {
        for state in [
            PipelineState::NotStarted,
            PipelineState::Running,
            PipelineState::Stopping,
            PipelineState::Stopped,
        ] {
            assert_eq!(get_status(router(state), "/health").await, StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_ready_only_while_running() {
        assert_eq!(
            get_status(router(PipelineState::Running), "/ready").await,
            StatusCode::OK
        );
        assert_eq!(
            get_status(router(PipelineState::Stopping), "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            get_status(router(PipelineState::NotStarted), "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_ready_follows_state_changes() {
        let (tx, rx) = watch::channel(PipelineState::Running);
        let app = create_router(ServerState::new(rx));
        assert_eq!(get_status(app.clone(), "/ready").await, StatusCode::OK);

        tx.send(PipelineState::Stopping).unwrap();
        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "not_ready");
        assert_eq!(json["state"], "stopping");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        assert_eq!(
            get_status(router(PipelineState::Running), "/metrics").await,
            StatusCode::OK
        );
    }
}
