//! AdmissionReview wire codec.
//!
//! Requests are decoded with kube's `AdmissionReview<DynamicObject>`, which
//! keeps the envelope's `apiVersion` on the request so the reply can echo
//! it. The response side is written here because the patch must go out as
//! a base64 string and the reason under `status`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use kube::core::DynamicObject;
use kube::core::admission::{self, AdmissionReview, META_API_VERSION_V1, META_KIND};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

/// Media type the API server sends admission reviews with
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// API version used when the inbound envelope could not be read
pub const DEFAULT_REVIEW_API_VERSION: &str = META_API_VERSION_V1;
/// `kind` of both envelopes
pub const REVIEW_KIND: &str = META_KIND;

/// An admission request with the submitted object left untyped
pub type AdmissionRequest = admission::AdmissionRequest<DynamicObject>;

/// Codec failures
#[derive(Error, Debug)]
pub enum CodecError {
    /// Request did not declare a JSON body
    #[error("contentType={0}, expect application/json")]
    BadContentType(String),

    /// Body is not a readable admission review
    #[error("malformed admission review: {0}")]
    Malformed(String),

    /// Response could not be serialized
    #[error("failed to encode admission review: {0}")]
    Encode(#[from] serde_json::Error),
}

/// `apiVersion` of the review `request` arrived in
pub fn review_api_version(request: &AdmissionRequest) -> &str {
    match request.types.api_version.as_str() {
        "" => DEFAULT_REVIEW_API_VERSION,
        version => version,
    }
}

/// Format of the patch carried by a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchType {
    #[serde(rename = "JSONPatch")]
    JsonPatch,
}

/// Status attached to a response that did not allow the request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: u16,
    pub message: String,
}

/// The `response` half of an admission review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<PatchType>,
    /// Base64-encoded JSON Patch document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    /// Reason for a refusal; `status` on the wire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

impl AdmissionResponse {
    /// Allow the request without changes
    pub fn allow(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: true,
            patch_type: None,
            patch: None,
            status: None,
        }
    }

    /// Refuse the request with a reason and HTTP-style code
    pub fn deny(uid: impl Into<String>, code: u16, message: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: false,
            patch_type: None,
            patch: None,
            status: Some(Status {
                code,
                message: message.into(),
            }),
        }
    }

    /// Response for a review that could not be decoded: uid is unknown and left empty
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::deny("", 400, message)
    }

    /// Attach a JSON Patch. The patch is serialized and base64-encoded.
    pub fn with_patch(mut self, patch: &json_patch::Patch) -> Result<Self, CodecError> {
        let bytes = serde_json::to_vec(patch)?;
        self.patch = Some(STANDARD.encode(bytes));
        self.patch_type = Some(PatchType::JsonPatch);
        Ok(self)
    }

    /// Reason text, if the response carries one
    pub fn message(&self) -> Option<&str> {
        self.status.as_ref().map(|status| status.message.as_str())
    }
}

/// Outbound envelope
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReviewOut {
    pub api_version: String,
    pub kind: String,
    pub response: AdmissionResponse,
}

/// True when `content_type`'s media type is `application/json` (parameters ignored)
fn is_json(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|essence| essence.trim().eq_ignore_ascii_case(JSON_CONTENT_TYPE))
        .unwrap_or(false)
}

/// Decode an inbound admission review body.
pub fn decode_request(
    body: &[u8],
    content_type: Option<&str>,
) -> Result<AdmissionRequest, CodecError> {
    let content_type = content_type.unwrap_or_default();
    if !is_json(content_type) {
        return Err(CodecError::BadContentType(content_type.to_string()));
    }

    let review: AdmissionReview<DynamicObject> =
        serde_json::from_slice(body).map_err(|e| CodecError::Malformed(e.to_string()))?;

    review
        .try_into()
        .map_err(|_| CodecError::Malformed("admission review has no request".to_string()))
}

/// Wrap a response in its envelope and serialize it.
///
/// Failures are logged here; the caller decides what to send instead.
pub fn encode_response(
    response: AdmissionResponse,
    api_version: &str,
) -> Result<Vec<u8>, CodecError> {
    let review = AdmissionReviewOut {
        api_version: api_version.to_string(),
        kind: REVIEW_KIND.to_string(),
        response,
    };
    serde_json::to_vec(&review).map_err(|e| {
        error!(error = %e, uid = %review.response.uid, "Failed to encode admission review");
        CodecError::Encode(e)
    })
}
