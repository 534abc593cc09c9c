use crate::ProxyMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A service as discovered in one cluster, with its ready backends joined in.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub namespace: String,

    /// The upstream service type (`ClusterIP`, `NodePort`, `LoadBalancer`, ...).
    pub service_type: String,

    pub cluster_ips: Vec<String>,
    pub external_ips: Vec<String>,

    pub instances: Vec<ServiceInstance>,

    /// Derived from the instances' modes; a single router instance makes the
    /// whole service a router.
    pub proxy_mode: ProxyMode,
}

/// One ready endpoint of a service, resolved to its backing pod.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub ip: String,
    pub pod_name: String,

    /// Always equals the owning service's namespace.
    pub namespace: String,

    pub meta: PodMeta,
    pub containers: Vec<Container>,
    pub proxy_mode: ProxyMode,

    /// True iff any container in the pod matched the envoy heuristics.
    pub envoy_present: bool,
}

/// Pod metadata retained on an instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PodMeta {
    pub phase: String,
    pub node: String,
    pub created: Option<DateTime<Utc>>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub image: String,
    pub status: String,
    pub ready: bool,
    pub restart_count: i32,
}

// === impl Service ===

impl Service {
    /// `namespace/name`, the arena key used by joins and lookups.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Recomputes the service-wide proxy mode from the instances.
    pub fn derive_proxy_mode(&mut self) {
        self.proxy_mode = ProxyMode::aggregate(self.instances.iter().map(|i| i.proxy_mode));
    }
}
