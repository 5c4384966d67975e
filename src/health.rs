//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (200 once the webhook listener is bound)
//! - `/metrics` - Prometheus metrics endpoint
//!
//! Served over plain HTTP on its own port so kubelet probes never depend on
//! the webhook's TLS setup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tracing::info;

/// Labels for admission metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct OutcomeLabels {
    pub outcome: String,
}

impl EncodeLabelSet for OutcomeLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("outcome", self.outcome.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Admission metrics, created once and shared by handle
pub struct Metrics {
    /// Admission reviews answered, by outcome
    pub requests_total: Family<OutcomeLabels, Counter>,
    /// Time from request arrival to response, by outcome
    pub duration_seconds: Family<OutcomeLabels, Histogram>,
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let requests_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "vn_affinity_admission_requests",
            "Total number of admission reviews answered",
            requests_total.clone(),
        );

        let duration_seconds = Family::<OutcomeLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.0005, 2.0, 14))
        });
        registry.register(
            "vn_affinity_admission_duration_seconds",
            "Duration of admission review handling in seconds",
            duration_seconds.clone(),
        );

        Self {
            requests_total,
            duration_seconds,
            registry,
        }
    }

    /// Record one answered admission review
    pub fn record_admission(&self, outcome: &str, duration_secs: f64) {
        let labels = OutcomeLabels {
            outcome: outcome.to_string(),
        };
        self.requests_total.get_or_create(&labels).inc();
        self.duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Count of reviews answered with `outcome`
    pub fn admissions(&self, outcome: &str) -> u64 {
        let labels = OutcomeLabels {
            outcome: outcome.to_string(),
        };
        self.requests_total.get_or_create(&labels).get()
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    ready: AtomicBool,
    pub metrics: Arc<Metrics>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new(Arc::new(Metrics::new()))
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            ready: AtomicBool::new(false),
            metrics,
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Liveness probe handler
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 503 until the webhook listener is accepting connections and
/// again once shutdown has begun.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready() {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server on `0.0.0.0:{port}`
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
