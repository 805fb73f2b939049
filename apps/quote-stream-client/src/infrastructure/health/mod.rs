//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint reporting bus connection and subscription status, plus
//! Prometheus metrics. Only started by the binary when a port is configured.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (bus connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::application::services::QuoteView;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Client version.
    pub version: String,
    /// Process uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Bus connection status.
    pub connection: ConnectionInfo,
    /// Active subscription status.
    pub subscription: SubscriptionInfo,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Connected, and receiving data for the active ticker if there is one.
    Healthy,
    /// Connected but no order book yet for the active ticker.
    Degraded,
    /// Bus not connected.
    Unhealthy,
}

/// Bus connection status.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    /// Connection state name.
    pub state: &'static str,
    /// Whether the bus is connected.
    pub connected: bool,
}

/// Active subscription status.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionInfo {
    /// Subscribed ticker.
    pub active_symbol: Option<String>,
    /// Whether an order book has arrived for it.
    pub has_order_book: bool,
    /// Server time of the latest order book.
    pub last_order_book_at: Option<DateTime<Utc>>,
    /// Executions currently retained.
    pub executions: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    view: watch::Receiver<QuoteView>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, view: watch::Receiver<QuoteView>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            view,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Build the health router.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

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
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
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
    if state.view.borrow().is_connected() {
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
    let view = state.view.borrow().clone();

    HealthResponse {
        status: determine_health_status(&view),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        connection: ConnectionInfo {
            state: view.connection.as_str(),
            connected: view.is_connected(),
        },
        subscription: SubscriptionInfo {
            has_order_book: view.stock_data.is_some(),
            last_order_book_at: view.stock_data.as_ref().and_then(|s| s.observed_at()),
            executions: view.executions.len(),
            active_symbol: view.active_symbol,
        },
    }
}

fn determine_health_status(view: &QuoteView) -> HealthStatus {
    if !view.is_connected() {
        return HealthStatus::Unhealthy;
    }
    if view.active_symbol.is_some() && view.stock_data.is_none() {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
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
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use rust_decimal::Decimal;
    use tower::ServiceExt;

    use super::*;
    use crate::domain::connection::ConnectionState;
    use crate::domain::market::{LADDER_DEPTH, OrderBookSnapshot};

    fn snapshot() -> OrderBookSnapshot {
        OrderBookSnapshot {
            ticker: "005930".to_string(),
            price: Decimal::from(71_200),
            volume: 1,
            ask_prices: vec![Decimal::from(71_300); LADDER_DEPTH],
            bid_prices: vec![Decimal::from(71_100); LADDER_DEPTH],
            ask_volumes: vec![1; LADDER_DEPTH],
            bid_volumes: vec![1; LADDER_DEPTH],
            timestamp: 1_718_000_000_000,
        }
    }

    fn view(connection: ConnectionState, symbol: Option<&str>, data: bool) -> QuoteView {
        QuoteView {
            connection,
            active_symbol: symbol.map(str::to_string),
            stock_data: data.then(snapshot),
            executions: Vec::new(),
        }
    }

    fn app(view: QuoteView) -> (Router, watch::Sender<QuoteView>) {
        let (tx, rx) = watch::channel(view);
        let state = Arc::new(HealthServerState::new("0.1.0".to_string(), rx));
        (router(state), tx)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }

    #[test]
    fn status_rules() {
        assert_eq!(
            determine_health_status(&view(ConnectionState::Disconnected, None, false)),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            determine_health_status(&view(ConnectionState::Connected, None, false)),
            HealthStatus::Healthy
        );
        assert_eq!(
            determine_health_status(&view(ConnectionState::Connected, Some("005930"), false)),
            HealthStatus::Degraded
        );
        assert_eq!(
            determine_health_status(&view(ConnectionState::Connected, Some("005930"), true)),
            HealthStatus::Healthy
        );
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        let (app, _tx) = app(QuoteView::default());
        let (status, body) = get(app, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn readiness_follows_connection() {
        let (router, tx) = app(QuoteView::default());
        let (status, _) = get(router.clone(), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        tx.send_replace(view(ConnectionState::Connected, None, false));
        let (status, body) = get(router, "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "READY");
    }

    #[tokio::test]
    async fn health_reports_subscription() {
        let (app, _tx) = app(view(ConnectionState::Connected, Some("005930"), true));
        let (status, body) = get(app, "/health").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["connection"]["state"], "connected");
        assert_eq!(json["subscription"]["active_symbol"], "005930");
        assert_eq!(json["subscription"]["has_order_book"], true);
    }

    #[tokio::test]
    async fn health_unavailable_when_disconnected() {
        let (app, _tx) = app(QuoteView::default());
        let (status, body) = get(app, "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("\"unhealthy\""));
    }
}
