use crate::server::ServerState;
use axum::{http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Occupancy response for `/stats`.
#[derive(Serialize)]
struct StatsResponse {
    connections: usize,
    authenticated: usize,
    pending_messages: usize,
}

/// Readiness check response.
#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    ready: bool,
}

/// Shared readiness state.
#[derive(Clone, Default)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
}

impl HealthState {
    /// Create a new health state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Mark the service as ready or draining.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Check if the service is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// Serve `/metrics`, `/health`, `/ready` and `/stats` until the listener fails.
///
/// # Errors
///
/// Returns an error if installing the recorder or binding the listener fails.
pub async fn start_metrics_server(
    addr: SocketAddr,
    health_state: HealthState,
    server: Arc<ServerState>,
) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
        .route("/health", get(health_handler))
        .route("/ready", get(move || ready_handler(health_state.clone())))
        .route("/stats", get(move || stats_handler(server.clone())));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Relay occupancy snapshot.
async fn stats_handler(server: Arc<ServerState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        connections: server.active_connections.load(Ordering::Relaxed),
        authenticated: server.registry.len(),
        pending_messages: server.store.len(),
    })
}

/// Health check handler - returns 200 if server is running.
async fn health_handler() -> (StatusCode, Json<HealthResponse>) {
    (StatusCode::OK, Json(HealthResponse { status: "healthy" }))
}

/// Readiness check handler - returns 200 if ready, 503 if not.
async fn ready_handler(state: HealthState) -> (StatusCode, Json<ReadyResponse>) {
    if state.is_ready() {
        (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready",
                ready: true,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "not ready",
                ready: false,
            }),
        )
    }
}

/// Connection and buffer gauges.
pub mod gauges {
    /// Increment the active connections gauge.
    pub fn inc_connections_active() {
        metrics::gauge!("parley_connections_active").increment(1.0);
    }

    /// Decrement the active connections gauge.
    pub fn dec_connections_active() {
        metrics::gauge!("parley_connections_active").decrement(1.0);
    }

    /// Record the number of buffered messages.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_pending_messages(count: usize) {
        metrics::gauge!("parley_pending_messages").set(count as f64);
    }
}

/// Event counters.
pub mod counters {
    /// Record an authentication attempt with the given status label.
    pub fn authentications_total(status: &'static str) {
        metrics::counter!("parley_authentications_total", "status" => status).increment(1);
    }

    /// Record a routed message with the given outcome label.
    pub fn messages_routed_total(outcome: &'static str) {
        metrics::counter!("parley_messages_routed_total", "outcome" => outcome).increment(1);
    }

    /// Increment the dropped-messages counter with the given reason label.
    pub fn messages_dropped_total(reason: &'static str) {
        metrics::counter!("parley_messages_dropped_total", "reason" => reason).increment(1);
    }

    /// Record messages removed by the expiry sweep.
    pub fn messages_expired_total(count: u64) {
        metrics::counter!("parley_messages_expired_total").increment(count);
    }

    /// Increment the malformed-frame counter.
    pub fn frames_malformed_total() {
        metrics::counter!("parley_frames_malformed_total").increment(1);
    }
}

/// Latency histograms.
pub mod histograms {
    /// Record a routing latency observation in seconds.
    pub fn route_latency_seconds(value: f64) {
        metrics::histogram!("parley_route_latency_seconds").record(value);
    }
}
