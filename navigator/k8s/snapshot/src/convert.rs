use crate::proxy::{classify_pod, has_envoy};
use ahash::AHashMap as HashMap;
use anyhow::Result;
use navigator_core as model;
use navigator_k8s_api::{self as k8s, istio, ResourceExt};

const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

/// Arena-style lookup maps joining services to their backends.
#[derive(Debug, Default)]
pub struct JoinMaps {
    /// `namespace/service-name` -> endpoint slices carrying that label.
    slices_by_service: HashMap<String, Vec<k8s::EndpointSlice>>,

    /// `namespace/pod-name` -> pod.
    pods_by_name: HashMap<String, k8s::Pod>,
}

// === impl JoinMaps ===

impl JoinMaps {
    pub fn new(slices: Vec<k8s::EndpointSlice>, pods: Vec<k8s::Pod>) -> Self {
        let mut slices_by_service = HashMap::<String, Vec<k8s::EndpointSlice>>::default();
        for slice in slices {
            let ns = slice.namespace().unwrap_or_default();
            let Some(svc) = slice
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(SERVICE_NAME_LABEL))
            else {
                continue;
            };
            slices_by_service
                .entry(format!("{ns}/{svc}"))
                .or_default()
                .push(slice);
        }

        let mut pods_by_name = HashMap::default();
        for pod in pods {
            let key = format!("{}/{}", pod.namespace().unwrap_or_default(), pod.name_any());
            pods_by_name.insert(key, pod);
        }

        Self {
            slices_by_service,
            pods_by_name,
        }
    }

    fn pod(&self, namespace: &str, name: &str) -> Option<&k8s::Pod> {
        self.pods_by_name.get(&format!("{namespace}/{name}"))
    }
}

/// Converts the listed services, joining in their ready endpoints and pods.
pub fn convert_services(services: Vec<k8s::Service>, joins: &JoinMaps) -> Vec<model::Service> {
    let mut out = Vec::with_capacity(services.len());
    for svc in services {
        let name = svc.name_any();
        let Some(namespace) = svc.namespace() else {
            tracing::warn!(service = %name, "skipping service without a namespace");
            continue;
        };

        let mut service = model::Service {
            service_type: svc
                .spec
                .as_ref()
                .and_then(|s| s.type_.clone())
                .unwrap_or_else(|| "ClusterIP".to_string()),
            cluster_ips: cluster_ips(&svc),
            external_ips: external_ips(&svc),
            instances: instances_for(&namespace, &name, joins),
            proxy_mode: Default::default(),
            name,
            namespace,
        };
        service.derive_proxy_mode();
        out.push(service);
    }
    out
}

fn instances_for(namespace: &str, service: &str, joins: &JoinMaps) -> Vec<model::ServiceInstance> {
    let Some(slices) = joins.slices_by_service.get(&format!("{namespace}/{service}")) else {
        return Vec::new();
    };

    let mut instances = Vec::new();
    for slice in slices {
        for endpoint in &slice.endpoints {
            // Absent readiness is treated as ready, matching the
            // EndpointSlice contract for unknown conditions.
            if endpoint
                .conditions
                .as_ref()
                .and_then(|c| c.ready)
                == Some(false)
            {
                continue;
            }

            let pod_name = endpoint
                .target_ref
                .as_ref()
                .filter(|t| t.kind.as_deref() == Some("Pod"))
                .and_then(|t| t.name.clone())
                .unwrap_or_default();
            let pod = (!pod_name.is_empty())
                .then(|| joins.pod(namespace, &pod_name))
                .flatten();

            for address in &endpoint.addresses {
                instances.push(instance(address, &pod_name, namespace, pod));
            }
        }
    }
    instances
}

fn instance(
    ip: &str,
    pod_name: &str,
    namespace: &str,
    pod: Option<&k8s::Pod>,
) -> model::ServiceInstance {
    model::ServiceInstance {
        ip: ip.to_string(),
        pod_name: pod_name.to_string(),
        namespace: namespace.to_string(),
        meta: pod.map(pod_meta).unwrap_or_default(),
        containers: pod.map(containers_of).unwrap_or_default(),
        proxy_mode: classify_pod(pod),
        envoy_present: pod.map(has_envoy).unwrap_or(false),
    }
}

fn pod_meta(pod: &k8s::Pod) -> model::PodMeta {
    model::PodMeta {
        phase: pod
            .status
            .as_ref()
            .and_then(|s| s.phase.clone())
            .unwrap_or_default(),
        node: pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.clone())
            .unwrap_or_default(),
        created: pod.metadata.creation_timestamp.as_ref().map(|t| t.0),
        labels: pod.metadata.labels.clone().unwrap_or_default(),
        annotations: pod.metadata.annotations.clone().unwrap_or_default(),
    }
}

fn containers_of(pod: &k8s::Pod) -> Vec<model::Container> {
    let statuses = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default();

    let spec_containers = pod
        .spec
        .as_ref()
        .map(|s| s.containers.as_slice())
        .unwrap_or_default();

    spec_containers
        .iter()
        .map(|c| {
            let status = statuses.iter().find(|s| s.name == c.name);
            model::Container {
                name: c.name.clone(),
                image: c.image.clone().unwrap_or_default(),
                status: status.map(container_state).unwrap_or_default(),
                ready: status.map(|s| s.ready).unwrap_or(false),
                restart_count: status.map(|s| s.restart_count).unwrap_or(0),
            }
        })
        .collect()
}

fn container_state(status: &k8s::ContainerStatus) -> String {
    let Some(state) = status.state.as_ref() else {
        return String::new();
    };
    if state.running.is_some() {
        return "Running".to_string();
    }
    if let Some(w) = &state.waiting {
        return w.reason.clone().unwrap_or_else(|| "Waiting".to_string());
    }
    if let Some(t) = &state.terminated {
        return t.reason.clone().unwrap_or_else(|| "Terminated".to_string());
    }
    String::new()
}

fn cluster_ips(svc: &k8s::Service) -> Vec<String> {
    let Some(spec) = svc.spec.as_ref() else {
        return Vec::new();
    };
    if let Some(ips) = spec.cluster_ips.clone() {
        if !ips.is_empty() {
            return ips;
        }
    }
    spec.cluster_ip.clone().into_iter().collect()
}

/// Resolves at most one externally-reachable address: a LoadBalancer ingress
/// IP first (hostname-only entries are ignored), then the first declared
/// external IP.
fn external_ips(svc: &k8s::Service) -> Vec<String> {
    if svc.spec.as_ref().and_then(|s| s.type_.as_deref()) == Some("LoadBalancer") {
        let ingress = svc
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_deref())
            .unwrap_or_default();
        if let Some(ip) = ingress
            .iter()
            .filter_map(|i| i.ip.as_deref())
            .find(|ip| !ip.is_empty())
        {
            return vec![ip.to_string()];
        }
    }

    svc.spec
        .as_ref()
        .and_then(|s| s.external_ips.as_deref())
        .and_then(|ips| ips.first())
        .map(|ip| vec![ip.clone()])
        .unwrap_or_default()
}

/// The raw per-kind mesh listings of one cycle.
#[derive(Debug, Default)]
pub struct MeshLists {
    pub destination_rules: Vec<istio::DestinationRule>,
    pub virtual_services: Vec<istio::VirtualService>,
    pub gateways: Vec<istio::Gateway>,
    pub sidecars: Vec<istio::Sidecar>,
    pub service_entries: Vec<istio::ServiceEntry>,
    pub envoy_filters: Vec<istio::EnvoyFilter>,
    pub peer_authentications: Vec<istio::PeerAuthentication>,
    pub request_authentications: Vec<istio::RequestAuthentication>,
    pub authorization_policies: Vec<istio::AuthorizationPolicy>,
    pub wasm_plugins: Vec<istio::WasmPlugin>,
}

/// Converts every listed mesh object into its normalized projection.
///
/// A per-object conversion failure is logged and the object skipped; the
/// remainder of the snapshot is unaffected.
pub fn convert_mesh(lists: MeshLists) -> model::MeshConfig {
    let mut mesh = model::MeshConfig::default();

    convert_each(lists.destination_rules, "DestinationRule", &mut mesh.destination_rules, destination_rule);
    convert_each(lists.virtual_services, "VirtualService", &mut mesh.virtual_services, virtual_service);
    convert_each(lists.gateways, "Gateway", &mut mesh.gateways, gateway);
    convert_each(lists.sidecars, "Sidecar", &mut mesh.sidecars, sidecar);
    convert_each(lists.service_entries, "ServiceEntry", &mut mesh.service_entries, service_entry);
    convert_each(lists.envoy_filters, "EnvoyFilter", &mut mesh.envoy_filters, envoy_filter);
    convert_each(lists.peer_authentications, "PeerAuthentication", &mut mesh.peer_authentications, peer_authentication);
    convert_each(lists.request_authentications, "RequestAuthentication", &mut mesh.request_authentications, request_authentication);
    convert_each(lists.authorization_policies, "AuthorizationPolicy", &mut mesh.authorization_policies, authorization_policy);
    convert_each(lists.wasm_plugins, "WasmPlugin", &mut mesh.wasm_plugins, wasm_plugin);

    mesh
}

fn convert_each<T, U>(
    objects: Vec<T>,
    kind: &str,
    out: &mut Vec<U>,
    convert: impl Fn(&T) -> Result<U>,
) where
    T: kube::Resource<DynamicType = ()>,
{
    for obj in &objects {
        match convert(obj) {
            Ok(converted) => out.push(converted),
            Err(error) => tracing::warn!(
                %kind,
                namespace = %obj.namespace().unwrap_or_default(),
                name = %obj.name_any(),
                %error,
                "skipping unconvertible mesh object"
            ),
        }
    }
}

fn raw_config<T: serde::Serialize>(obj: &T) -> Result<String> {
    serde_json::to_string(obj).map_err(Into::into)
}

fn target_refs(refs: Option<&Vec<istio::PolicyTargetRef>>) -> Vec<model::TargetRef> {
    refs.map(|refs| refs.iter().map(target_ref).collect())
        .unwrap_or_default()
}

fn target_ref(r: &istio::PolicyTargetRef) -> model::TargetRef {
    model::TargetRef {
        group: r.group.clone().unwrap_or_default(),
        kind: r.kind.clone().unwrap_or_default(),
        name: r.name.clone().unwrap_or_default(),
        namespace: r.namespace.clone(),
    }
}

fn destination_rule(dr: &istio::DestinationRule) -> Result<model::DestinationRule> {
    let spec = &dr.spec;
    Ok(model::DestinationRule {
        name: dr.name_any(),
        namespace: dr.namespace().unwrap_or_default(),
        raw_config: raw_config(dr)?,
        host: spec.host.clone().unwrap_or_default(),
        subsets: spec
            .subsets
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|s| model::Subset {
                name: s.name.clone().unwrap_or_default(),
                labels: s.labels.clone().unwrap_or_default(),
            })
            .collect(),
        export_to: model::mesh::export_to_or_default(spec.export_to.clone()),
        workload_selector: spec
            .workload_selector
            .as_ref()
            .and_then(|s| s.match_labels.clone()),
    })
}

fn virtual_service(vs: &istio::VirtualService) -> Result<model::VirtualService> {
    let spec = &vs.spec;
    Ok(model::VirtualService {
        name: vs.name_any(),
        namespace: vs.namespace().unwrap_or_default(),
        raw_config: raw_config(vs)?,
        hosts: spec.hosts.clone().unwrap_or_default(),
        gateways: model::mesh::gateways_or_default(spec.gateways.clone()),
        export_to: model::mesh::export_to_or_default(spec.export_to.clone()),
    })
}

fn gateway(gw: &istio::Gateway) -> Result<model::Gateway> {
    Ok(model::Gateway {
        name: gw.name_any(),
        namespace: gw.namespace().unwrap_or_default(),
        raw_config: raw_config(gw)?,
        selector: gw.spec.selector.clone().unwrap_or_default(),
    })
}

fn sidecar(sc: &istio::Sidecar) -> Result<model::Sidecar> {
    Ok(model::Sidecar {
        name: sc.name_any(),
        namespace: sc.namespace().unwrap_or_default(),
        raw_config: raw_config(sc)?,
        workload_selector: sc
            .spec
            .workload_selector
            .as_ref()
            .and_then(|s| s.labels.clone()),
    })
}

fn service_entry(se: &istio::ServiceEntry) -> Result<model::ServiceEntry> {
    Ok(model::ServiceEntry {
        name: se.name_any(),
        namespace: se.namespace().unwrap_or_default(),
        raw_config: raw_config(se)?,
        hosts: se.spec.hosts.clone().unwrap_or_default(),
        export_to: model::mesh::export_to_or_default(se.spec.export_to.clone()),
    })
}

fn envoy_filter(ef: &istio::EnvoyFilter) -> Result<model::EnvoyFilter> {
    Ok(model::EnvoyFilter {
        name: ef.name_any(),
        namespace: ef.namespace().unwrap_or_default(),
        raw_config: raw_config(ef)?,
        workload_selector: ef
            .spec
            .workload_selector
            .as_ref()
            .and_then(|s| s.labels.clone()),
        target_refs: target_refs(ef.spec.target_refs.as_ref()),
    })
}

fn peer_authentication(pa: &istio::PeerAuthentication) -> Result<model::PeerAuthentication> {
    Ok(model::PeerAuthentication {
        name: pa.name_any(),
        namespace: pa.namespace().unwrap_or_default(),
        raw_config: raw_config(pa)?,
        selector: pa.spec.selector.as_ref().and_then(|s| s.match_labels.clone()),
    })
}

fn request_authentication(ra: &istio::RequestAuthentication) -> Result<model::RequestAuthentication> {
    Ok(model::RequestAuthentication {
        name: ra.name_any(),
        namespace: ra.namespace().unwrap_or_default(),
        raw_config: raw_config(ra)?,
        selector: ra.spec.selector.as_ref().and_then(|s| s.match_labels.clone()),
        target_refs: target_refs(ra.spec.target_refs.as_ref()),
    })
}

fn authorization_policy(ap: &istio::AuthorizationPolicy) -> Result<model::AuthorizationPolicy> {
    let mut refs = target_refs(ap.spec.target_refs.as_ref());
    if let Some(singleton) = ap.spec.target_ref.as_ref() {
        refs.insert(0, target_ref(singleton));
    }
    Ok(model::AuthorizationPolicy {
        name: ap.name_any(),
        namespace: ap.namespace().unwrap_or_default(),
        raw_config: raw_config(ap)?,
        selector: ap.spec.selector.as_ref().and_then(|s| s.match_labels.clone()),
        target_refs: refs,
    })
}

fn wasm_plugin(wp: &istio::WasmPlugin) -> Result<model::WasmPlugin> {
    Ok(model::WasmPlugin {
        name: wp.name_any(),
        namespace: wp.namespace().unwrap_or_default(),
        raw_config: raw_config(wp)?,
        selector: wp.spec.selector.as_ref().and_then(|s| s.match_labels.clone()),
        target_refs: target_refs(wp.spec.target_refs.as_ref()),
    })
}
