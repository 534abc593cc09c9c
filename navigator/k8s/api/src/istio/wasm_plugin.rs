use super::{LabelSelector, PolicyTargetRef};
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
    group = "extensions.istio.io",
    version = "v1alpha1",
    kind = "WasmPlugin",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct WasmPluginSpec {
    pub selector: Option<LabelSelector>,

    pub target_refs: Option<Vec<PolicyTargetRef>>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}
