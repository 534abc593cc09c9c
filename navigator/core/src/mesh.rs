//! Normalized projections of the mesh configuration kinds carried in a
//! snapshot.
//!
//! Every object keeps the full upstream resource JSON-serialized in
//! `raw_config` for downstream inspection; the typed fields are the
//! projection the aggregator and query surfaces actually consume.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type SelectorLabels = BTreeMap<String, String>;

/// A reference to a policy attachment target (`targetRef`/`targetRefs`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    pub group: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DestinationRule {
    pub name: String,
    pub namespace: String,
    pub raw_config: String,

    /// The rule's host, verbatim; an empty host is preserved.
    pub host: String,
    pub subsets: Vec<Subset>,

    /// Never empty after conversion; absent upstream values become `["*"]`.
    pub export_to: Vec<String>,
    pub workload_selector: Option<SelectorLabels>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Subset {
    pub name: String,
    pub labels: SelectorLabels,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualService {
    pub name: String,
    pub namespace: String,
    pub raw_config: String,

    pub hosts: Vec<String>,

    /// Never empty after conversion; absent upstream values become `["mesh"]`.
    pub gateways: Vec<String>,

    /// Never empty after conversion; absent upstream values become `["*"]`.
    pub export_to: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Gateway {
    pub name: String,
    pub namespace: String,
    pub raw_config: String,

    pub selector: SelectorLabels,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Sidecar {
    pub name: String,
    pub namespace: String,
    pub raw_config: String,

    pub workload_selector: Option<SelectorLabels>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    pub namespace: String,
    pub raw_config: String,

    pub hosts: Vec<String>,
    pub export_to: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvoyFilter {
    pub name: String,
    pub namespace: String,
    pub raw_config: String,

    pub workload_selector: Option<SelectorLabels>,
    pub target_refs: Vec<TargetRef>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerAuthentication {
    pub name: String,
    pub namespace: String,
    pub raw_config: String,

    pub selector: Option<SelectorLabels>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestAuthentication {
    pub name: String,
    pub namespace: String,
    pub raw_config: String,

    pub selector: Option<SelectorLabels>,
    pub target_refs: Vec<TargetRef>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationPolicy {
    pub name: String,
    pub namespace: String,
    pub raw_config: String,

    pub selector: Option<SelectorLabels>,

    /// A singleton upstream `targetRef` is flattened into this list.
    pub target_refs: Vec<TargetRef>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WasmPlugin {
    pub name: String,
    pub namespace: String,
    pub raw_config: String,

    pub selector: Option<SelectorLabels>,
    pub target_refs: Vec<TargetRef>,
}

/// All mesh configuration observed in one snapshot cycle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshConfig {
    pub destination_rules: Vec<DestinationRule>,
    pub virtual_services: Vec<VirtualService>,
    pub gateways: Vec<Gateway>,
    pub sidecars: Vec<Sidecar>,
    pub service_entries: Vec<ServiceEntry>,
    pub envoy_filters: Vec<EnvoyFilter>,
    pub peer_authentications: Vec<PeerAuthentication>,
    pub request_authentications: Vec<RequestAuthentication>,
    pub authorization_policies: Vec<AuthorizationPolicy>,
    pub wasm_plugins: Vec<WasmPlugin>,
}

// === impl MeshConfig ===

impl MeshConfig {
    pub fn object_count(&self) -> usize {
        self.destination_rules.len()
            + self.virtual_services.len()
            + self.gateways.len()
            + self.sidecars.len()
            + self.service_entries.len()
            + self.envoy_filters.len()
            + self.peer_authentications.len()
            + self.request_authentications.len()
            + self.authorization_policies.len()
            + self.wasm_plugins.len()
    }
}

/// Normalizes an `exportTo` list: absent or empty means exported everywhere.
pub fn export_to_or_default(export_to: Option<Vec<String>>) -> Vec<String> {
    match export_to {
        Some(v) if !v.is_empty() => v,
        _ => vec!["*".to_string()],
    }
}

/// Normalizes a virtual service's `gateways` list; an unset list binds the
/// routes to the mesh gateway.
pub fn gateways_or_default(gateways: Option<Vec<String>>) -> Vec<String> {
    match gateways {
        Some(v) if !v.is_empty() => v,
        _ => vec!["mesh".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_to_is_never_empty() {
        assert_eq!(export_to_or_default(None), vec!["*"]);
        assert_eq!(export_to_or_default(Some(vec![])), vec!["*"]);
        assert_eq!(
            export_to_or_default(Some(vec![".".to_string()])),
            vec!["."]
        );
    }

    #[test]
    fn gateways_default_to_mesh() {
        assert_eq!(gateways_or_default(None), vec!["mesh"]);
        assert_eq!(
            gateways_or_default(Some(vec!["my-gw".to_string()])),
            vec!["my-gw"]
        );
    }
}
