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
    kind = "AuthorizationPolicy",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationPolicySpec {
    pub selector: Option<LabelSelector>,

    /// The singular form; folded into the plural list on conversion.
    pub target_ref: Option<PolicyTargetRef>,

    pub target_refs: Option<Vec<PolicyTargetRef>>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}
