use ahash::AHashMap as HashMap;
use navigator_core::IstioControlPlaneConfig;
use navigator_k8s_api::{Deployment, ResourceExt};

/// Namespaces probed for a control plane before anything else observed in
/// the cluster.
const PREFERRED_NAMESPACES: &[&str] = &["istio-system", "istio-control-plane", "istiod", "istio"];

const SCOPE_GATEWAY_ENV: &str = "PILOT_SCOPE_GATEWAY_TO_NAMESPACE";

/// Selects the active istiod deployment from a cluster-wide `app=istiod`
/// listing and derives the control-plane settings.
///
/// `istio-system` wins outright when it hosts any istiod deployment; among
/// other candidate namespaces the one whose active deployment has the most
/// ready replicas is selected.
pub fn discover_control_plane<'d>(
    deployments: impl IntoIterator<Item = &'d Deployment>,
    observed_namespaces: impl IntoIterator<Item = String>,
) -> IstioControlPlaneConfig {
    let mut by_namespace = HashMap::<String, Vec<&Deployment>>::default();
    for d in deployments {
        by_namespace.entry(d.namespace().unwrap_or_default()).or_default().push(d);
    }

    let mut candidates: Vec<String> = PREFERRED_NAMESPACES.iter().map(|s| s.to_string()).collect();
    for ns in observed_namespaces {
        if !candidates.contains(&ns) {
            candidates.push(ns);
        }
    }

    let mut selected: Option<(String, &Deployment)> = None;
    for ns in &candidates {
        let Some(list) = by_namespace.get(ns) else {
            continue;
        };
        let Some(active) = select_active(list) else {
            continue;
        };
        if ns == "istio-system" {
            selected = Some((ns.clone(), active));
            break;
        }
        let replace = match &selected {
            None => true,
            Some((_, best)) => ready_replicas(active) > ready_replicas(best),
        };
        if replace {
            selected = Some((ns.clone(), active));
        }
    }

    match selected {
        Some((namespace, deployment)) => {
            tracing::debug!(
                namespace = %namespace,
                deployment = %deployment.name_any(),
                "selected istio control plane"
            );
            IstioControlPlaneConfig {
                pilot_scope_gateway_to_namespace: scope_gateway_to_namespace(deployment),
                root_namespace: namespace,
            }
        }
        None => IstioControlPlaneConfig::default(),
    }
}

/// Picks a namespace's active deployment: the one literally named `istiod`,
/// else the one with the most ready replicas, first occurrence winning ties.
fn select_active<'d>(list: &[&'d Deployment]) -> Option<&'d Deployment> {
    if let Some(d) = list.iter().find(|d| d.name_any() == "istiod") {
        return Some(*d);
    }
    let mut best: Option<&'d Deployment> = None;
    for &d in list {
        match best {
            None => best = Some(d),
            Some(b) if ready_replicas(d) > ready_replicas(b) => best = Some(d),
            Some(_) => {}
        }
    }
    best
}

fn ready_replicas(d: &Deployment) -> i32 {
    d.status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0)
}

/// Reads `PILOT_SCOPE_GATEWAY_TO_NAMESPACE` from the `discovery` container;
/// anything but a literal `"true"` (including absence) leaves scoping off.
fn scope_gateway_to_namespace(d: &Deployment) -> bool {
    let containers = d
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .map(|s| s.containers.as_slice())
        .unwrap_or_default();

    containers
        .iter()
        .find(|c| c.name == "discovery")
        .and_then(|c| c.env.as_deref())
        .and_then(|env| env.iter().find(|e| e.name == SCOPE_GATEWAY_ENV))
        .and_then(|e| e.value.as_deref())
        .map(|v| v == "true")
        .unwrap_or(false)
}
