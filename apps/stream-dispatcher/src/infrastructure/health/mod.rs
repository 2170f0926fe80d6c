//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint reporting per-category stream status and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON status of every category stream
//! - `GET /healthz` - liveness probe (simple OK)
//! - `GET /readyz` - readiness probe (some category streaming, or none planned)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{CategorySnapshot, StatusBoard};
use crate::domain::streaming::StreamState;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Per-category stream status.
    pub categories: Vec<CategorySnapshot>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every category is streaming.
    Healthy,
    /// Some category is reconnecting or degraded.
    Degraded,
    /// No category is streaming.
    Unhealthy,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    board: StatusBoard,
}

impl HealthServerState {
    /// Create health server state over a status board.
    #[must_use]
    pub fn new(version: String, board: StatusBoard) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            board,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let snapshots = state.board.snapshots();
    let is_ready = snapshots.is_empty()
        || snapshots
            .iter()
            .any(|snapshot| snapshot.state == StreamState::Streaming);

    if is_ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let categories = state.board.snapshots();
    HealthResponse {
        status: determine_health_status(&categories),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        categories,
    }
}

fn determine_health_status(categories: &[CategorySnapshot]) -> HealthStatus {
    let streaming = categories
        .iter()
        .filter(|snapshot| snapshot.state == StreamState::Streaming)
        .count();

    if streaming == categories.len() {
        HealthStatus::Healthy
    } else if streaming > 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::domain::streaming::Category;

    fn board(states: &[(Category, StreamState)]) -> StatusBoard {
        let mut board = StatusBoard::new();
        for (category, state) in states {
            board.track(*category).set_state(*state);
        }
        board
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }

    #[test]
    fn all_streaming_is_healthy() {
        let board = board(&[
            (Category::Trades, StreamState::Streaming),
            (Category::Candles, StreamState::Streaming),
        ]);
        assert_eq!(determine_health_status(&board.snapshots()), HealthStatus::Healthy);
    }

    #[test]
    fn one_degraded_category_degrades() {
        let board = board(&[
            (Category::Trades, StreamState::Streaming),
            (Category::Candles, StreamState::Degraded),
        ]);
        assert_eq!(determine_health_status(&board.snapshots()), HealthStatus::Degraded);
    }

    #[test]
    fn nothing_streaming_is_unhealthy() {
        let board = board(&[(Category::Orders, StreamState::Reconnecting)]);
        assert_eq!(determine_health_status(&board.snapshots()), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn readiness_reflects_streams() {
        let state = Arc::new(HealthServerState::new(
            "test".to_string(),
            board(&[(Category::Trades, StreamState::Connecting)]),
        ));

        let response = router(Arc::clone(&state))
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state
            .board
            .get(Category::Trades)
            .unwrap()
            .set_state(StreamState::Streaming);
        let response = router(state)
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
