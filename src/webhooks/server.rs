//! Admission webhook server.
//!
//! Provides HTTPS endpoints for the pod mutating webhook:
//! - `POST /mutate` (and `/inject`, the route older webhook configurations use)
//! - `GET /healthz`
//!
//! Every request is answered with an `AdmissionReview` envelope. Nothing is
//! shared between requests except the immutable label pair and metrics.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use tracing::{debug, error, info, warn};

use crate::config::PolicyConfig;
use crate::error::Result;
use crate::health::Metrics;
use crate::webhooks::codec::{
    AdmissionRequest, AdmissionResponse, CodecError, DEFAULT_REVIEW_API_VERSION,
    JSON_CONTENT_TYPE, decode_request, encode_response, review_api_version,
};
use crate::webhooks::policies::{Decision, describe_resource, evaluate};

/// Largest review body accepted (the API server's own request limit)
pub const MAX_BODY_BYTES: usize = 3 * 1024 * 1024;

/// Shared state for webhook handlers
pub struct WebhookState {
    pub policy: PolicyConfig,
    pub metrics: Arc<Metrics>,
    pub request_timeout: Duration,
}

impl WebhookState {
    pub fn new(policy: PolicyConfig, metrics: Arc<Metrics>, request_timeout: Duration) -> Self {
        Self {
            policy,
            metrics,
            request_timeout,
        }
    }
}

/// A response ready to be encoded, with the envelope version and metric label
struct Answer {
    status: StatusCode,
    api_version: String,
    response: AdmissionResponse,
    outcome: &'static str,
}

impl Answer {
    fn undecodable(err: &CodecError) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            api_version: DEFAULT_REVIEW_API_VERSION.to_string(),
            response: AdmissionResponse::invalid(err.to_string()),
            outcome: "malformed",
        }
    }

    fn timed_out(timeout: Duration) -> Self {
        Self {
            status: StatusCode::GATEWAY_TIMEOUT,
            api_version: DEFAULT_REVIEW_API_VERSION.to_string(),
            response: AdmissionResponse::invalid(format!(
                "admission review not answered within {}s",
                timeout.as_secs()
            )),
            outcome: "timeout",
        }
    }
}

/// Create the webhook router
pub fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate", post(mutate_pods))
        .route("/inject", post(mutate_pods))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Pod mutation handler
async fn mutate_pods(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let started = Instant::now();

    let answer = match tokio::time::timeout(
        state.request_timeout,
        review(&state.policy, &headers, body),
    )
    .await
    {
        Ok(answer) => answer,
        Err(_) => {
            warn!(
                timeout_secs = state.request_timeout.as_secs(),
                "Admission review timed out"
            );
            Answer::timed_out(state.request_timeout)
        }
    };

    state
        .metrics
        .record_admission(answer.outcome, started.elapsed().as_secs_f64());

    match encode_response(answer.response, &answer.api_version) {
        Ok(bytes) => (answer.status, [(CONTENT_TYPE, JSON_CONTENT_TYPE)], bytes).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Read, decode and evaluate one admission review.
async fn review(policy: &PolicyConfig, headers: &HeaderMap, body: Body) -> Answer {
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());

    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let err = CodecError::Malformed(format!("cannot read request body: {}", e));
            warn!(error = %err, "Rejecting admission review");
            return Answer::undecodable(&err);
        }
    };

    let request = match decode_request(&bytes, content_type) {
        Ok(request) => request,
        Err(err) => {
            warn!(error = %err, "Rejecting admission review");
            return Answer::undecodable(&err);
        }
    };

    debug!(
        uid = %request.uid,
        resource = %describe_resource(&request.resource),
        operation = ?request.operation,
        namespace = ?request.namespace,
        name = %request.name,
        "Processing admission request"
    );

    respond(&request, evaluate(&request, policy))
}

/// Map a policy decision to an explicit response.
fn respond(request: &AdmissionRequest, decision: Decision) -> Answer {
    let uid = request.uid.as_str();
    let mut outcome = decision.outcome();

    let response = match decision {
        Decision::Allow(patch) => match AdmissionResponse::allow(uid).with_patch(&patch) {
            Ok(response) => {
                info!(
                    uid = %uid,
                    namespace = ?request.namespace,
                    name = %request.name,
                    "Patching pod"
                );
                response
            }
            Err(e) => {
                error!(uid = %uid, error = %e, "Failed to encode placement patch");
                outcome = "errored";
                AdmissionResponse::deny(uid, 500, e.to_string())
            }
        },
        Decision::Deny(reason) => {
            warn!(uid = %uid, reason = %reason, "Admission request denied");
            AdmissionResponse::deny(uid, 403, reason)
        }
        Decision::Error(cause) => {
            warn!(uid = %uid, cause = %cause, "Admission request rejected");
            AdmissionResponse::deny(uid, 400, cause)
        }
    };

    Answer {
        status: StatusCode::OK,
        api_version: review_api_version(request).to_string(),
        response,
        outcome,
    }
}

/// Run the webhook server with TLS
///
/// Binds to `0.0.0.0:{port}`. `handle` lets the caller observe when the
/// listener is bound and trigger graceful shutdown.
pub async fn run_webhook_server(
    state: Arc<WebhookState>,
    tls: Arc<rustls::ServerConfig>,
    port: u16,
    handle: Handle,
) -> Result<()> {
    let app = create_webhook_router(state);
    let config = RustlsConfig::from_config(tls);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Webhook server listening with TLS");

    axum_server::bind_rustls(addr, config)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
