//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, stream status reporting, and
//! Prometheus metrics. Used by container orchestrators, load balancers,
//! and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (checks streams)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::registry::{StreamRegistry, StreamSnapshot};
use crate::domain::stream::LifecycleState;
use crate::infrastructure::binance::listen_key::{ApiStatus, ApiStatusSnapshot};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Per-stream status.
    pub streams: Vec<StreamHealth>,
    /// Aggregate buffer statistics.
    pub buffers: BufferTotals,
    /// Most recent REST API observation, when a listen-key client exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiStatusSnapshot>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All streams running.
    Healthy,
    /// Some streams down but at least one running.
    Degraded,
    /// No stream running.
    Unhealthy,
}

/// Individual stream status.
#[derive(Debug, Clone, Serialize)]
pub struct StreamHealth {
    /// The stream id.
    pub stream_id: String,
    /// Lifecycle state name.
    pub state: String,
    /// Generation token of the current connection attempt.
    pub generation: u64,
    /// Events currently buffered.
    pub buffered_events: usize,
    /// Events dropped because the buffer was full.
    pub dropped_events: u64,
    /// Control messages waiting to be sent.
    pub pending_payloads: usize,
    /// Whether this is an authenticated user-data stream.
    pub user_data: bool,
    /// Why the stream crashed, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crash_reason: Option<String>,
}

impl From<&StreamSnapshot> for StreamHealth {
    fn from(snapshot: &StreamSnapshot) -> Self {
        Self {
            stream_id: snapshot.stream_id.to_string(),
            state: snapshot.lifecycle.as_str().to_string(),
            generation: snapshot.generation,
            buffered_events: snapshot.buffered_events,
            dropped_events: snapshot.dropped_events,
            pending_payloads: snapshot.pending_payloads,
            user_data: snapshot.is_user_data,
            crash_reason: snapshot.crash_reason.clone(),
        }
    }
}

/// Aggregate buffer statistics.
#[derive(Debug, Clone, Serialize)]
pub struct BufferTotals {
    /// Events buffered across all streams.
    pub buffered_events: usize,
    /// Events dropped across all streams.
    pub dropped_events: u64,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    registry: Arc<StreamRegistry>,
    api_status: Option<Arc<ApiStatus>>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        registry: Arc<StreamRegistry>,
        api_status: Option<Arc<ApiStatus>>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            registry,
            api_status,
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
        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state);

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
    let stats = state.registry.stats();

    // Ready once at least one stream is running.
    if stats.running > 0 {
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
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let snapshots = state.registry.snapshot();
    let streams: Vec<StreamHealth> = snapshots.iter().map(StreamHealth::from).collect();
    let stats = state.registry.stats();

    HealthResponse {
        status: determine_health_status(&snapshots),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        streams,
        buffers: BufferTotals {
            buffered_events: stats.buffered_events,
            dropped_events: stats.dropped_events,
        },
        api: state.api_status.as_ref().map(|s| s.snapshot()),
    }
}

fn determine_health_status(snapshots: &[StreamSnapshot]) -> HealthStatus {
    let running = snapshots
        .iter()
        .filter(|s| s.lifecycle == LifecycleState::Running)
        .count();

    if running == 0 {
        HealthStatus::Unhealthy
    } else if running == snapshots.len() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
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
