// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Functional tests for the webhook HTTP surface.
//!
//! The routers are driven in-process with `tower::ServiceExt::oneshot`, so
//! no TLS listener or cluster is needed.
//!
//! ```bash
//! cargo test --test functional
//! ```

#[path = "../common/mod.rs"]
mod common;

mod mutate_tests;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use vn_affinity_admission::{Metrics, PolicyConfig, WebhookState, create_webhook_router};

/// Webhook router plus the metrics handle it records into
pub fn webhook(timeout: Duration) -> (Router, Arc<Metrics>) {
    let metrics = Arc::new(Metrics::new());
    let state = WebhookState::new(
        PolicyConfig::new("type", "virtual-kubelet"),
        metrics.clone(),
        timeout,
    );
    (create_webhook_router(Arc::new(state)), metrics)
}

/// Send a request and return the status and raw body
pub async fn send(router: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

/// POST a review body to `path` with the given content type
pub fn post(path: &str, content_type: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", content_type)
        .body(body.into())
        .unwrap()
}

/// Parse a response body as an AdmissionReview
pub fn review(body: &[u8]) -> Value {
    serde_json::from_slice(body).expect("response should be an AdmissionReview")
}
