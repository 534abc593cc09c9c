use crate::{MeshConfig, Service, DEFAULT_ROOT_NAMESPACE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A complete per-cycle view of one cluster's state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub cluster: String,
    pub services: Vec<Service>,
    pub mesh: MeshConfig,
    pub control_plane: IstioControlPlaneConfig,
    pub taken_at: DateTime<Utc>,
}

/// Settings derived from the selected istiod deployment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IstioControlPlaneConfig {
    pub pilot_scope_gateway_to_namespace: bool,
    pub root_namespace: String,
}

// === impl ClusterSnapshot ===

impl ClusterSnapshot {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            services: Vec::new(),
            mesh: MeshConfig::default(),
            control_plane: IstioControlPlaneConfig::default(),
            taken_at: Utc::now(),
        }
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<&Service> {
        self.services
            .iter()
            .find(|s| s.namespace == namespace && s.name == name)
    }
}

// === impl IstioControlPlaneConfig ===

impl Default for IstioControlPlaneConfig {
    fn default() -> Self {
        Self {
            pilot_scope_gateway_to_namespace: false,
            root_namespace: DEFAULT_ROOT_NAMESPACE.to_string(),
        }
    }
}
