#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod aggregated;
pub mod mesh;
mod metrics;
mod proxy;
mod service;
mod snapshot;
pub mod transport;

pub use self::{
    aggregated::{AggregatedInstance, AggregatedService, SyncStatus},
    mesh::{
        AuthorizationPolicy, DestinationRule, EnvoyFilter, Gateway, MeshConfig,
        PeerAuthentication, RequestAuthentication, ServiceEntry, Sidecar, Subset, TargetRef,
        VirtualService, WasmPlugin,
    },
    metrics::{LatencyBucket, LatencyDistribution, PairId, ServicePairMetrics, TimeWindow},
    proxy::ProxyMode,
    service::{Container, PodMeta, Service, ServiceInstance},
    snapshot::{ClusterSnapshot, IstioControlPlaneConfig},
};

/// The namespace assumed to hold the mesh control plane when discovery finds
/// nothing better.
pub const DEFAULT_ROOT_NAMESPACE: &str = "istio-system";
