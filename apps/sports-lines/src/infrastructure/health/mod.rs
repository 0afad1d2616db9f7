//! Health Check and Metrics Endpoint
//!
//! # Endpoints
//!
//! - `GET /health` - JSON status with version and uptime
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /ready` - Readiness probe (storage reachable and initial sync done)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::application::ports::LineStore;
use crate::application::services::ReadinessState;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Response Types
// =============================================================================

/// Overall status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Synced and serving.
    Healthy,
    /// Initial sync has not completed yet.
    Starting,
}

/// `/health` response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Seconds since the health server state was created.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Whether the initial sync completed.
    pub synced: bool,
}

/// `/ready` response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadyResponse {
    /// Whether the service can serve subscribers.
    pub ready: bool,
    /// Why not, when not ready.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    readiness: Arc<ReadinessState>,
    store: Arc<dyn LineStore>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, readiness: Arc<ReadinessState>, store: Arc<dyn LineStore>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            readiness,
            store,
        }
    }

    async fn readiness(&self) -> ReadyResponse {
        let error = if self.store.ping().await.is_err() {
            Some("storage unreachable")
        } else if !self.readiness.is_synced() {
            Some("storage not synced with the lines provider")
        } else {
            None
        };

        ReadyResponse {
            ready: error.is_none(),
            error,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    addr: SocketAddr,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(
        addr: SocketAddr,
        state: Arc<HealthServerState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            addr,
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
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.addr, e.to_string()))?;

        tracing::info!(addr = %self.addr, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }

    /// Run the server on `tracker`.
    ///
    /// A failure cancels the shutdown token, stopping the whole service, and
    /// is kept on the returned [`HealthMonitor`] so the exit can tell it
    /// apart from a signal.
    #[must_use]
    pub fn spawn(self, tracker: &TaskTracker) -> HealthMonitor {
        let (failed_tx, failed_rx) = oneshot::channel();
        let shutdown = self.cancel.clone();

        tracker.spawn(async move {
            if let Err(e) = self.run().await {
                tracing::error!(error = %e, "Health server error");
                // Send before cancel; waiters check it once woken.
                let _ = failed_tx.send(e);
                shutdown.cancel();
            }
        });

        HealthMonitor { failed: failed_rx }
    }
}

/// Reports whether a spawned [`HealthServer`] failed.
#[derive(Debug)]
pub struct HealthMonitor {
    failed: oneshot::Receiver<HealthServerError>,
}

impl HealthMonitor {
    /// Take the server's failure, if it has failed.
    pub fn failure(&mut self) -> Option<HealthServerError> {
        self.failed.try_recv().ok()
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let synced = state.readiness.is_synced();
    Json(HealthResponse {
        status: if synced {
            HealthStatus::Healthy
        } else {
            HealthStatus::Starting
        },
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        synced,
    })
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = state.readiness().await;
    let status = if response.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
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

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to the address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
