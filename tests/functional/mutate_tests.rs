//! `/mutate` end-to-end: envelope in, envelope out.

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::StatusCode;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

use crate::common::fixtures::{ReviewBuilder, minimal_pod, placed_pod};
use crate::{post, review, send, webhook};
use vn_affinity_admission::webhooks::MAX_BODY_BYTES;

const TIMEOUT: Duration = Duration::from_secs(5);

fn decoded_patch(review: &Value) -> Value {
    let encoded = review["response"]["patch"]
        .as_str()
        .expect("patch should be a base64 string");
    serde_json::from_slice(&STANDARD.decode(encoded).unwrap()).unwrap()
}

#[tokio::test]
async fn test_empty_pod_gets_placement_patch() {
    let (router, metrics) = webhook(TIMEOUT);
    let body = ReviewBuilder::pod("abc123").object(json!({})).build();

    let (status, bytes) = send(router, post("/mutate", "application/json", body)).await;
    assert_eq!(status, StatusCode::OK);

    let review = review(&bytes);
    assert_eq!(review["apiVersion"], "admission.k8s.io/v1");
    assert_eq!(review["kind"], "AdmissionReview");
    assert_eq!(review["response"]["uid"], "abc123");
    assert_eq!(review["response"]["allowed"], true);
    assert_eq!(review["response"]["patchType"], "JSONPatch");

    let patch = decoded_patch(&review);
    assert_eq!(
        patch,
        json!([
            {
                "op": "add",
                "path": "/spec/affinity",
                "value": {"nodeAffinity": {"preferredDuringSchedulingIgnoredDuringExecution": [{
                    "preference": {"matchExpressions": [{
                        "key": "type", "operator": "NotIn", "values": ["virtual-kubelet"]
                    }]},
                    "weight": 1
                }]}}
            },
            {
                "op": "add",
                "path": "/spec/tolerations",
                "value": [
                    {"key": "virtual-kubelet.io/provider", "operator": "Exists"},
                    {"effect": "NoSchedule", "key": "azure.com/aci"}
                ]
            }
        ])
    );
    assert_eq!(metrics.admissions("allowed"), 1);
}

#[tokio::test]
async fn test_patch_replaces_existing_placement() {
    let (router, _) = webhook(TIMEOUT);
    let mut pod = placed_pod("db");
    let body = ReviewBuilder::pod("uid-placed").object(pod.clone()).build();

    let (_, bytes) = send(router, post("/mutate", "application/json", body)).await;
    let review = review(&bytes);
    assert_eq!(review["response"]["allowed"], true);

    let patch: json_patch::Patch = serde_json::from_value(decoded_patch(&review)).unwrap();
    json_patch::patch(&mut pod, &patch).unwrap();

    let node_affinity = &pod["spec"]["affinity"]["nodeAffinity"];
    assert!(node_affinity.get("requiredDuringSchedulingIgnoredDuringExecution").is_none());
    let terms = node_affinity["preferredDuringSchedulingIgnoredDuringExecution"]
        .as_array()
        .unwrap();
    assert_eq!(terms.len(), 1);
    assert_eq!(terms[0]["weight"], 1);

    let tolerations = pod["spec"]["tolerations"].as_array().unwrap();
    assert_eq!(tolerations.len(), 2);
    assert!(tolerations.iter().all(|t| t["key"] != "dedicated"));
}

#[tokio::test]
async fn test_inject_route_matches_mutate() {
    let body = ReviewBuilder::pod("same-uid").build();

    let (router, _) = webhook(TIMEOUT);
    let (_, mutate) = send(router, post("/mutate", "application/json", body.clone())).await;
    let (router, _) = webhook(TIMEOUT);
    let (_, inject) = send(router, post("/inject", "application/json", body)).await;

    assert_eq!(review(&mutate), review(&inject));
}

#[tokio::test]
async fn test_v1beta1_envelope_is_echoed() {
    let (router, _) = webhook(TIMEOUT);
    let body = ReviewBuilder::pod("beta")
        .api_version("admission.k8s.io/v1beta1")
        .build();

    let (_, bytes) = send(router, post("/mutate", "application/json", body)).await;
    assert_eq!(review(&bytes)["apiVersion"], "admission.k8s.io/v1beta1");
}

#[tokio::test]
async fn test_non_pod_resource_is_denied() {
    let (router, metrics) = webhook(TIMEOUT);
    let body = ReviewBuilder::pod("svc-uid")
        .resource("", "v1", "services")
        .object(json!({"apiVersion": "v1", "kind": "Service", "spec": {}}))
        .build();

    let (status, bytes) = send(router, post("/mutate", "application/json", body)).await;
    assert_eq!(status, StatusCode::OK);

    let review = review(&bytes);
    assert_eq!(review["response"]["uid"], "svc-uid");
    assert_eq!(review["response"]["allowed"], false);
    assert!(review["response"].get("patch").is_none());
    assert!(review["response"].get("patchType").is_none());
    assert!(review["response"].get("result").is_none());
    assert_eq!(review["response"]["status"]["code"], 403);
    assert!(
        review["response"]["status"]["message"]
            .as_str()
            .unwrap()
            .contains("unexpected resource type")
    );
    assert_eq!(metrics.admissions("denied"), 1);
}

#[tokio::test]
async fn test_unparsable_object_is_rejected() {
    let (router, metrics) = webhook(TIMEOUT);
    let body = ReviewBuilder::pod("bad-object")
        .object(json!({"apiVersion": "v1", "kind": "ConfigMap", "data": {}}))
        .build();

    let (status, bytes) = send(router, post("/mutate", "application/json", body)).await;
    assert_eq!(status, StatusCode::OK);

    let review = review(&bytes);
    assert_eq!(review["response"]["uid"], "bad-object");
    assert_eq!(review["response"]["allowed"], false);
    assert!(!review["response"]["status"]["message"].as_str().unwrap().is_empty());
    assert_eq!(metrics.admissions("errored"), 1);
}

#[tokio::test]
async fn test_delete_without_object_is_rejected() {
    let (router, _) = webhook(TIMEOUT);
    let body = ReviewBuilder::pod("delete-uid")
        .operation("DELETE")
        .without_object()
        .build();

    let (_, bytes) = send(router, post("/mutate", "application/json", body)).await;
    let review = review(&bytes);
    assert_eq!(review["response"]["allowed"], false);
    assert_eq!(review["response"]["uid"], "delete-uid");
}

#[tokio::test]
async fn test_malformed_json_with_wrong_content_type() {
    let (router, metrics) = webhook(TIMEOUT);

    let (status, bytes) = send(router, post("/mutate", "text/plain", "{{{ not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let review = review(&bytes);
    assert_eq!(review["response"]["allowed"], false);
    assert_eq!(review["response"]["uid"], "");
    assert!(
        review["response"]["status"]["message"]
            .as_str()
            .unwrap()
            .contains("text/plain")
    );
    assert_eq!(metrics.admissions("malformed"), 1);
}

#[tokio::test]
async fn test_malformed_json_with_json_content_type() {
    let (router, _) = webhook(TIMEOUT);

    let (status, bytes) = send(router, post("/mutate", "application/json", "{\"request\":")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let review = review(&bytes);
    assert_eq!(review["response"]["allowed"], false);
    assert_eq!(review["response"]["uid"], "");
    assert!(!review["response"]["status"]["message"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let (router, _) = webhook(TIMEOUT);
    let mut pod = minimal_pod("big");
    pod["metadata"]["annotations"] = json!({"blob": "x".repeat(MAX_BODY_BYTES)});
    let body = ReviewBuilder::pod("big").object(pod).build();

    let (status, bytes) = send(router, post("/mutate", "application/json", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(review(&bytes)["response"]["allowed"], false);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_body_hits_deadline() {
    let (router, metrics) = webhook(Duration::from_secs(2));
    let stalled = futures::stream::pending::<Result<Bytes, std::io::Error>>();

    let (status, bytes) = send(
        router,
        post("/mutate", "application/json", Body::from_stream(stalled)),
    )
    .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);

    let review = review(&bytes);
    assert_eq!(review["response"]["allowed"], false);
    assert!(
        review["response"]["status"]["message"]
            .as_str()
            .unwrap()
            .contains("2s")
    );
    assert_eq!(metrics.admissions("timeout"), 1);
}

#[tokio::test]
async fn test_get_on_mutate_is_not_allowed() {
    let (router, _) = webhook(TIMEOUT);
    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/mutate")
        .body(Body::empty())
        .unwrap();

    let (status, _) = send(router, request).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}
