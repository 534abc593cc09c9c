use ahash::AHashMap as HashMap;
use navigator_core::{
    AggregatedInstance, AggregatedService, ClusterSnapshot, ProxyMode,
};
use parking_lot::RwLock;
use std::sync::Arc;

/// Merges per-cluster snapshots into the globally-keyed service view.
///
/// Writers replace a cluster's sub-slice and rebuild the view under the
/// write lock; readers clone an `Arc` to the current view, so a query sees
/// either the old or the new view, never a mix.
#[derive(Default)]
pub struct Aggregator {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    snapshots: HashMap<String, ClusterSnapshot>,
    view: Arc<GlobalView>,
}

/// The aggregated cross-cluster state served to the query surface.
#[derive(Debug, Default, PartialEq)]
pub struct GlobalView {
    /// Sorted by service ID.
    pub services: Vec<AggregatedService>,
}

// === impl Aggregator ===

impl Aggregator {
    /// Applies one cluster's snapshot and recomputes the aggregated view.
    pub fn apply(&self, snapshot: ClusterSnapshot) {
        let mut inner = self.inner.write();
        inner.snapshots.insert(snapshot.cluster.clone(), snapshot);
        inner.view = Arc::new(rebuild(&inner.snapshots));
    }

    /// Drops a cluster's contribution entirely.
    pub fn forget(&self, cluster: &str) {
        let mut inner = self.inner.write();
        if inner.snapshots.remove(cluster).is_some() {
            inner.view = Arc::new(rebuild(&inner.snapshots));
        }
    }

    pub fn view(&self) -> Arc<GlobalView> {
        self.inner.read().view.clone()
    }
}

// === impl GlobalView ===

impl GlobalView {
    pub fn service(&self, id: &str) -> Option<&AggregatedService> {
        self.services.iter().find(|s| s.id == id)
    }

    pub fn instance(&self, service_id: &str, instance_id: &str) -> Option<&AggregatedInstance> {
        self.service(service_id)?
            .instances
            .iter()
            .find(|i| i.id == instance_id)
    }

    pub fn services_in(&self, namespace: Option<&str>) -> Vec<&AggregatedService> {
        self.services
            .iter()
            .filter(|s| namespace.is_none_or(|ns| s.namespace == ns))
            .collect()
    }
}

fn rebuild(snapshots: &HashMap<String, ClusterSnapshot>) -> GlobalView {
    struct Accumulated {
        service_type: String,
        clusters: Vec<String>,
        cluster_ips: Vec<String>,
        external_ips: Vec<String>,
        instances: Vec<AggregatedInstance>,
    }

    let mut by_key: HashMap<(String, String), Accumulated> = HashMap::default();

    // Deterministic cluster order keeps rebuilds reproducible regardless of
    // snapshot arrival order.
    let mut clusters: Vec<&ClusterSnapshot> = snapshots.values().collect();
    clusters.sort_by(|a, b| a.cluster.cmp(&b.cluster));

    for snapshot in clusters {
        for service in &snapshot.services {
            let entry = by_key
                .entry((service.namespace.clone(), service.name.clone()))
                .or_insert_with(|| Accumulated {
                    service_type: service.service_type.clone(),
                    clusters: Vec::new(),
                    cluster_ips: Vec::new(),
                    external_ips: Vec::new(),
                    instances: Vec::new(),
                });
            entry.clusters.push(snapshot.cluster.clone());
            entry.cluster_ips.extend(service.cluster_ips.iter().cloned());
            entry
                .external_ips
                .extend(service.external_ips.iter().cloned());
            entry.instances.extend(
                service
                    .instances
                    .iter()
                    .map(|i| AggregatedInstance::new(&snapshot.cluster, i.clone())),
            );
        }
    }

    let mut services: Vec<AggregatedService> = by_key
        .into_iter()
        .map(|((namespace, name), mut acc)| {
            acc.cluster_ips.sort();
            acc.cluster_ips.dedup();
            acc.external_ips.sort();
            acc.external_ips.dedup();
            acc.instances.sort_by(|a, b| a.id.cmp(&b.id));

            let proxy_mode =
                ProxyMode::aggregate(acc.instances.iter().map(|i| i.instance.proxy_mode));

            AggregatedService {
                id: AggregatedService::service_id(&namespace, &name),
                name,
                namespace,
                service_type: acc.service_type,
                clusters: acc.clusters,
                cluster_ips: acc.cluster_ips,
                external_ips: acc.external_ips,
                proxy_mode,
                instances: acc.instances,
            }
        })
        .collect();
    services.sort_by(|a, b| a.id.cmp(&b.id));

    GlobalView { services }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navigator_core::{Service, ServiceInstance};

    fn mk_instance(pod: &str, namespace: &str, proxy_mode: ProxyMode) -> ServiceInstance {
        ServiceInstance {
            ip: "10.0.0.1".to_string(),
            pod_name: pod.to_string(),
            namespace: namespace.to_string(),
            proxy_mode,
            ..Default::default()
        }
    }

    fn mk_service(
        namespace: &str,
        name: &str,
        cluster_ip: &str,
        instances: Vec<ServiceInstance>,
    ) -> Service {
        let mut svc = Service {
            name: name.to_string(),
            namespace: namespace.to_string(),
            service_type: "ClusterIP".to_string(),
            cluster_ips: vec![cluster_ip.to_string()],
            external_ips: vec![],
            instances,
            proxy_mode: ProxyMode::Unknown,
        };
        svc.derive_proxy_mode();
        svc
    }

    fn mk_snapshot(cluster: &str, services: Vec<Service>) -> ClusterSnapshot {
        let mut snapshot = ClusterSnapshot::new(cluster);
        snapshot.services = services;
        snapshot
    }

    #[test]
    fn services_merge_across_clusters_by_namespace_and_name() {
        let aggregator = Aggregator::default();
        aggregator.apply(mk_snapshot(
            "east",
            vec![mk_service(
                "shop",
                "backend",
                "10.1.0.1",
                vec![mk_instance("backend-0", "shop", ProxyMode::Sidecar)],
            )],
        ));
        aggregator.apply(mk_snapshot(
            "west",
            vec![mk_service(
                "shop",
                "backend",
                "10.2.0.1",
                vec![mk_instance("backend-0", "shop", ProxyMode::Router)],
            )],
        ));

        let view = aggregator.view();
        assert_eq!(view.services.len(), 1);
        let svc = &view.services[0];
        assert_eq!(svc.id, "shop:backend");
        assert_eq!(svc.clusters, vec!["east", "west"]);
        assert_eq!(svc.cluster_ips, vec!["10.1.0.1", "10.2.0.1"]);
        assert_eq!(svc.proxy_mode, ProxyMode::Router);

        // Same pod name in two clusters: distinct instance identities.
        assert_eq!(svc.instances.len(), 2);
        assert_eq!(svc.instances[0].id, "east:shop:backend-0");
        assert_eq!(svc.instances[1].id, "west:shop:backend-0");
    }

    #[test]
    fn applying_the_same_snapshot_twice_is_idempotent() {
        let aggregator = Aggregator::default();
        let snapshot = mk_snapshot(
            "east",
            vec![
                mk_service(
                    "shop",
                    "backend",
                    "10.1.0.1",
                    vec![mk_instance("backend-0", "shop", ProxyMode::Sidecar)],
                ),
                mk_service("shop", "frontend", "10.1.0.2", vec![]),
            ],
        );

        aggregator.apply(snapshot.clone());
        let first = aggregator.view();
        aggregator.apply(snapshot);
        let second = aggregator.view();
        assert_eq!(*first, *second);
    }

    #[test]
    fn a_new_snapshot_replaces_the_cluster_sub_slice() {
        let aggregator = Aggregator::default();
        aggregator.apply(mk_snapshot(
            "east",
            vec![mk_service("shop", "backend", "10.1.0.1", vec![])],
        ));
        aggregator.apply(mk_snapshot(
            "east",
            vec![mk_service("shop", "frontend", "10.1.0.2", vec![])],
        ));

        let view = aggregator.view();
        assert_eq!(view.services.len(), 1);
        assert_eq!(view.services[0].id, "shop:frontend");
    }

    #[test]
    fn readers_keep_a_consistent_view_across_writes() {
        let aggregator = Aggregator::default();
        aggregator.apply(mk_snapshot(
            "east",
            vec![mk_service("shop", "backend", "10.1.0.1", vec![])],
        ));
        let before = aggregator.view();
        aggregator.apply(mk_snapshot("east", vec![]));
        assert_eq!(before.services.len(), 1, "old view must stay intact");
        assert_eq!(aggregator.view().services.len(), 0);
    }

    #[test]
    fn namespace_filter_and_lookups() {
        let aggregator = Aggregator::default();
        aggregator.apply(mk_snapshot(
            "east",
            vec![
                mk_service(
                    "shop",
                    "backend",
                    "10.1.0.1",
                    vec![mk_instance("backend-0", "shop", ProxyMode::Sidecar)],
                ),
                mk_service("infra", "prometheus", "10.1.0.9", vec![]),
            ],
        ));

        let view = aggregator.view();
        assert_eq!(view.services_in(None).len(), 2);
        assert_eq!(view.services_in(Some("shop")).len(), 1);
        assert!(view.service("shop:backend").is_some());
        assert!(view.service("shop:missing").is_none());
        assert!(view
            .instance("shop:backend", "east:shop:backend-0")
            .is_some());
        assert!(view.instance("shop:backend", "west:shop:backend-0").is_none());
    }
}
