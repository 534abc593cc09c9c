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
    group = "security.istio.io",
    version = "v1beta1",
    kind = "RequestAuthentication",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RequestAuthenticationSpec {
    pub selector: Option<LabelSelector>,

    pub target_refs: Option<Vec<PolicyTargetRef>>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}
