//! Mutating admission webhook for pods.
//!
//! - `codec`: AdmissionReview envelopes in and out
//! - `policies`: the pod placement decision and its JSON Patch
//! - `server`: HTTPS routes tying the two together

pub mod codec;
pub mod policies;
mod server;

pub use codec::{
    AdmissionRequest, AdmissionResponse, CodecError, decode_request, encode_response,
    review_api_version,
};
pub use policies::{Decision, evaluate};
pub use server::{MAX_BODY_BYTES, WebhookState, create_webhook_router, run_webhook_server};
