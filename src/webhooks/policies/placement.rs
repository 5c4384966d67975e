//! Placement patch for pods.
//!
//! Two whole-value `add` operations:
//! - `/spec/affinity`: prefer nodes whose `key` label is NOT `value`
//! - `/spec/tolerations`: tolerate the virtual-kubelet provider taint and
//!   the ACI burst taint
//!
//! Both replace whatever the pod already had.

use json_patch::{AddOperation, Patch, PatchOperation};
use jsonptr::PointerBuf;
use k8s_openapi::api::core::v1::{
    Affinity, NodeAffinity, NodeSelectorRequirement, NodeSelectorTerm, PreferredSchedulingTerm,
    Toleration,
};

use crate::config::PolicyConfig;

/// Taint key every virtual-kubelet node carries
pub const PROVIDER_TAINT_KEY: &str = "virtual-kubelet.io/provider";
/// Taint key of Azure Container Instances burst nodes
pub const ACI_TAINT_KEY: &str = "azure.com/aci";
/// Effect of the ACI burst taint
pub const ACI_TAINT_EFFECT: &str = "NoSchedule";
/// Weight of the preferred node-affinity term
pub const AFFINITY_WEIGHT: i32 = 1;

/// Soft node affinity away from nodes labelled `key=value`.
pub fn affinity(config: &PolicyConfig) -> Affinity {
    Affinity {
        node_affinity: Some(NodeAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                PreferredSchedulingTerm {
                    preference: NodeSelectorTerm {
                        match_expressions: Some(vec![NodeSelectorRequirement {
                            key: config.key.clone(),
                            operator: "NotIn".to_string(),
                            values: Some(vec![config.value.clone()]),
                        }]),
                        match_fields: None,
                    },
                    weight: AFFINITY_WEIGHT,
                },
            ]),
            required_during_scheduling_ignored_during_execution: None,
        }),
        ..Default::default()
    }
}

/// Tolerations for the virtual-kubelet provider and ACI taints.
pub fn tolerations() -> Vec<Toleration> {
    vec![
        Toleration {
            key: Some(PROVIDER_TAINT_KEY.to_string()),
            operator: Some("Exists".to_string()),
            ..Default::default()
        },
        Toleration {
            effect: Some(ACI_TAINT_EFFECT.to_string()),
            key: Some(ACI_TAINT_KEY.to_string()),
            ..Default::default()
        },
    ]
}

/// Build the two-operation patch for `config`.
pub fn placement_patch(config: &PolicyConfig) -> Result<Patch, serde_json::Error> {
    Ok(Patch(vec![
        PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(["spec", "affinity"]),
            value: serde_json::to_value(affinity(config))?,
        }),
        PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(["spec", "tolerations"]),
            value: serde_json::to_value(tolerations())?,
        }),
    ]))
}
