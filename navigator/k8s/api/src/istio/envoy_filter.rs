use super::{PolicyTargetRef, WorkloadSelector};
use std::collections::BTreeMap;

#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    kube::CustomResource,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[kube(
    group = "networking.istio.io",
    version = "v1alpha3",
    kind = "EnvoyFilter",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct EnvoyFilterSpec {
    pub workload_selector: Option<WorkloadSelector>,

    pub target_refs: Option<Vec<PolicyTargetRef>>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}
