use crate::{ProxyMode, ServiceInstance};
use serde::{Deserialize, Serialize};

/// Health of a cluster's edge connection, as seen by the manager.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Connecting,
    Healthy,
    Stale,
    Disconnected,
}

/// A service identity merged across every cluster that contributes it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedService {
    /// Stable across recomputations: `namespace:name`.
    pub id: String,

    pub name: String,
    pub namespace: String,
    pub service_type: String,

    /// Clusters contributing at least one instance, sorted.
    pub clusters: Vec<String>,

    /// Union over contributing clusters, sorted and deduplicated.
    pub cluster_ips: Vec<String>,
    pub external_ips: Vec<String>,

    pub proxy_mode: ProxyMode,
    pub instances: Vec<AggregatedInstance>,
}

/// One instance of an aggregated service, tagged with its origin cluster.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedInstance {
    /// Stable across recomputations: `cluster:namespace:pod`.
    pub id: String,

    pub cluster: String,
    pub instance: ServiceInstance,
}

// === impl AggregatedService ===

impl AggregatedService {
    pub fn service_id(namespace: &str, name: &str) -> String {
        format!("{namespace}:{name}")
    }
}

// === impl AggregatedInstance ===

impl AggregatedInstance {
    pub fn instance_id(cluster: &str, namespace: &str, pod: &str) -> String {
        format!("{cluster}:{namespace}:{pod}")
    }

    pub fn new(cluster: impl Into<String>, instance: ServiceInstance) -> Self {
        let cluster = cluster.into();
        let id = Self::instance_id(&cluster, &instance.namespace, &instance.pod_name);
        Self {
            id,
            cluster,
            instance,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Connecting => "connecting".fmt(f),
            SyncStatus::Healthy => "healthy".fmt(f),
            SyncStatus::Stale => "stale".fmt(f),
            SyncStatus::Disconnected => "disconnected".fmt(f),
        }
    }
}
