//! Mutation policy for pod admission.
//!
//! `evaluate` is a pure function of the request and the label pair. Every
//! call ends in exactly one [`Decision`]; the server maps each variant to
//! an explicit response.

pub mod placement;

use json_patch::Patch;
use k8s_openapi::api::core::v1::Pod;
use kube::core::GroupVersionResource;

use crate::config::PolicyConfig;
use crate::webhooks::codec::AdmissionRequest;

pub use placement::placement_patch;

/// Outcome of evaluating one admission request
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Admit the pod with this patch applied
    Allow(Patch),
    /// The request is not for a pod
    Deny(String),
    /// The submitted object is not a usable pod
    Error(String),
}

impl Decision {
    /// Short label used in logs and metrics
    pub fn outcome(&self) -> &'static str {
        match self {
            Decision::Allow(_) => "allowed",
            Decision::Deny(_) => "denied",
            Decision::Error(_) => "errored",
        }
    }
}

/// Core `v1` pods, the only resource this webhook mutates
const POD_RESOURCE: (&str, &str, &str) = ("", "v1", "pods");

fn is_pods(resource: &GroupVersionResource) -> bool {
    let (group, version, plural) = POD_RESOURCE;
    resource.group == group && resource.version == version && resource.resource == plural
}

/// `group/version/resource`, with the core group shown as empty
pub fn describe_resource(resource: &GroupVersionResource) -> String {
    format!("{}/{}/{}", resource.group, resource.version, resource.resource)
}

/// Decide what to do with `request`.
pub fn evaluate(request: &AdmissionRequest, config: &PolicyConfig) -> Decision {
    if !is_pods(&request.resource) {
        let (group, version, plural) = POD_RESOURCE;
        return Decision::Deny(format!(
            "unexpected resource type {}, expect {}/{}/{}",
            describe_resource(&request.resource),
            group,
            version,
            plural
        ));
    }

    let Some(object) = request.object.as_ref() else {
        return Decision::Error("admission request carries no object".to_string());
    };

    if let Err(e) = object.clone().try_parse::<Pod>() {
        return Decision::Error(format!("cannot decode object as Pod: {}", e));
    }

    match placement_patch(config) {
        Ok(patch) => Decision::Allow(patch),
        Err(e) => Decision::Error(format!("cannot build placement patch: {}", e)),
    }
}
