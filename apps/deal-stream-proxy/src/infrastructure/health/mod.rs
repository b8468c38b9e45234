//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, feed status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (upstream feed open)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::session::FeedState;
use crate::infrastructure::broadcast::SharedBroadcastHub;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Proxy version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Feed connection status.
    pub feeds: FeedsStatus,
    /// Subscriber fan-out statistics.
    pub subscribers: SubscriberStatus,
    /// Symbols in the last published snapshot.
    pub tracked_symbols: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Upstream open but the control feed is down.
    Degraded,
    /// Upstream feed unavailable.
    Unhealthy,
}

/// Feed connection status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedsStatus {
    /// Exchange deal feed status.
    pub upstream: FeedInfo,
    /// Control feed status, absent when not configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control: Option<FeedInfo>,
}

/// Individual feed status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Feed name.
    pub name: &'static str,
    /// Session state.
    pub state: String,
    /// Whether this feed is open.
    pub connected: bool,
    /// Messages received count.
    pub messages_received: u64,
    /// Reconnect attempts since the last open.
    pub reconnect_attempts: u32,
    /// When the feed last opened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_opened_at: Option<DateTime<Utc>>,
    /// Last error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Subscriber fan-out statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberStatus {
    /// Attached subscribers.
    pub attached: usize,
    /// Payloads published.
    pub published: u64,
    /// Failed deliveries.
    pub delivery_failures: u64,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    upstream: Arc<FeedState>,
    control: Option<Arc<FeedState>>,
    broadcast_hub: SharedBroadcastHub,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        upstream: Arc<FeedState>,
        control: Option<Arc<FeedState>>,
        broadcast_hub: SharedBroadcastHub,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            upstream,
            control,
            broadcast_hub,
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

/// Build the health router.
#[must_use]
pub fn router(state: Arc<HealthServerState>) -> Router {
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
    if state.upstream.is_open() {
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
    let upstream = feed_state_to_info(&state.upstream);
    let control = state.control.as_deref().map(feed_state_to_info);
    let status = determine_health_status(&upstream, control.as_ref());

    let hub = &state.broadcast_hub;
    let stats = hub.stats();
    let tracked_symbols = hub
        .last_snapshot()
        .and_then(|payload| payload.snapshot().map(|snapshot| snapshot.prices.len()))
        .unwrap_or(0);

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feeds: FeedsStatus { upstream, control },
        subscribers: SubscriberStatus {
            attached: stats.subscribers,
            published: stats.published,
            delivery_failures: stats.delivery_failures,
        },
        tracked_symbols,
    }
}

fn feed_state_to_info(state: &FeedState) -> FeedInfo {
    let session_state = state.get_state();

    FeedInfo {
        name: state.name(),
        state: session_state.as_str().to_string(),
        connected: state.is_open(),
        messages_received: state.get_messages_received(),
        reconnect_attempts: state.get_reconnect_attempts(),
        last_opened_at: state.get_last_opened_at(),
        last_error: state.get_error(),
    }
}

fn determine_health_status(upstream: &FeedInfo, control: Option<&FeedInfo>) -> HealthStatus {
    match (upstream.connected, control.is_none_or(|c| c.connected)) {
        (true, true) => HealthStatus::Healthy,
        (true, false) => HealthStatus::Degraded,
        (false, _) => HealthStatus::Unhealthy,
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
    use crate::application::ports::Payload;
    use crate::domain::pricing::PriceStore;
    use crate::domain::session::SessionState;
    use crate::domain::subscription::SubscriptionSet;
    use crate::infrastructure::broadcast::BroadcastHub;

    fn info(connected: bool) -> FeedInfo {
        FeedInfo {
            name: "upstream",
            state: if connected { "open" } else { "backoff" }.to_string(),
            connected,
            messages_received: 100,
            reconnect_attempts: u32::from(!connected),
            last_opened_at: None,
            last_error: None,
        }
    }

    fn open_feed(name: &'static str) -> Arc<FeedState> {
        let state = Arc::new(FeedState::new(name));
        state.transition(SessionState::Connecting);
        state.transition(SessionState::Open);
        state
    }

    fn state_with(upstream: Arc<FeedState>, control: Option<Arc<FeedState>>) -> Arc<HealthServerState> {
        Arc::new(HealthServerState::new(
            "0.1.0".to_string(),
            upstream,
            control,
            Arc::new(BroadcastHub::with_defaults()),
        ))
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn determine_status_table() {
        let cases = [
            (true, None, HealthStatus::Healthy),
            (true, Some(true), HealthStatus::Healthy),
            (true, Some(false), HealthStatus::Degraded),
            (false, None, HealthStatus::Unhealthy),
            (false, Some(true), HealthStatus::Unhealthy),
        ];
        for (upstream, control, expected) in cases {
            let control = control.map(info);
            assert_eq!(
                determine_health_status(&info(upstream), control.as_ref()),
                expected,
                "upstream={upstream} control={control:?}"
            );
        }
    }

    #[test]
    fn health_response_counts_tracked_symbols() {
        let state = state_with(open_feed("upstream"), None);
        let mut store = PriceStore::new();
        store.rebuild(&SubscriptionSet::from_raw(["BTCUSDT", "ETHUSDT"]));
        state
            .broadcast_hub
            .publish(Payload::Snapshot(store.snapshot()));

        let response = build_health_response(&state);
        assert_eq!(response.status, HealthStatus::Healthy);
        assert_eq!(response.tracked_symbols, 2);
        assert_eq!(response.subscribers.published, 1);
        assert_eq!(response.feeds.upstream.state, "open");
    }

    #[tokio::test]
    async fn readiness_follows_upstream() {
        let upstream = Arc::new(FeedState::new("upstream"));
        let app = router(state_with(Arc::clone(&upstream), Some(open_feed("control"))));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        upstream.transition(SessionState::Connecting);
        upstream.transition(SessionState::Open);
        let response = app
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_endpoint_reports_degraded_control() {
        let control = Arc::new(FeedState::new("control"));
        let app = router(state_with(open_feed("upstream"), Some(control)));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["feeds"]["control"]["name"], "control");
        assert_eq!(json["feeds"]["control"]["state"], "disconnected");
        assert_eq!(json["feeds"]["upstream"]["connected"], true);
    }
}
