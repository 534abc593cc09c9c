use navigator_core::ProxyMode;
use navigator_k8s_api as k8s;

const WAYPOINT_LABEL: &str = "istio.io/waypoint-for";

const GATEWAY_LABELS: &[&str] = &["istio.io/gateway-name", "gateway.networking.k8s.io/gateway-name"];

/// `label name -> values` combinations that mark classic istio gateways.
const GATEWAY_LABEL_VALUES: &[(&str, &[&str])] = &[
    ("app", &["istio-ingressgateway", "istio-egressgateway"]),
    ("istio", &["ingressgateway", "egressgateway"]),
];

const ENVOY_NAME_HINTS: &[&str] = &["envoy", "proxy", "sidecar"];
const ENVOY_IMAGE_HINTS: &[&str] = &["envoy", "istio/proxyv2", "istio-proxy"];

/// Matches a container against the envoy identification rules: the name
/// contains "envoy"/"proxy"/"sidecar" or the image contains
/// "envoy"/"istio/proxyv2"/"istio-proxy", case-insensitively.
pub fn is_envoy_container(container: &k8s::Container) -> bool {
    let name = container.name.to_lowercase();
    if ENVOY_NAME_HINTS.iter().any(|h| name.contains(h)) {
        return true;
    }
    let image = container
        .image
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();
    ENVOY_IMAGE_HINTS.iter().any(|h| image.contains(h))
}

/// Derives the pod's proxy mode.
///
/// Waypoint pods take precedence over every gateway marker: an ambient
/// waypoint is a specialized sidecar, not a gateway, even when it also
/// carries a gateway label.
pub fn classify_pod(pod: Option<&k8s::Pod>) -> ProxyMode {
    let Some(pod) = pod else {
        return ProxyMode::Unknown;
    };

    let labels = pod.metadata.labels.clone().unwrap_or_default();

    if labels.contains_key(WAYPOINT_LABEL) {
        if GATEWAY_LABELS.iter().any(|l| labels.contains_key(*l)) {
            tracing::warn!(
                pod = %pod.metadata.name.as_deref().unwrap_or_default(),
                namespace = %pod.metadata.namespace.as_deref().unwrap_or_default(),
                "pod carries both waypoint and gateway labels; classifying as sidecar"
            );
        }
        return ProxyMode::Sidecar;
    }

    if GATEWAY_LABELS.iter().any(|l| labels.contains_key(*l)) {
        return ProxyMode::Router;
    }
    for (label, values) in GATEWAY_LABEL_VALUES {
        if let Some(v) = labels.get(*label) {
            if values.contains(&v.as_str()) {
                return ProxyMode::Router;
            }
        }
    }

    let spec = pod.spec.as_ref();
    let main = spec.map(|s| s.containers.as_slice()).unwrap_or_default();
    let init = spec
        .and_then(|s| s.init_containers.as_deref())
        .unwrap_or_default();

    // An envoy container running in proxy mode declares it on the command
    // line: `proxy router` for gateways, `proxy sidecar` otherwise.
    for container in main.iter().chain(init) {
        if !is_envoy_container(container) {
            continue;
        }
        if let Some(args) = container.args.as_deref() {
            if args.len() >= 2 && args[0] == "proxy" {
                return match args[1].as_str() {
                    "router" => ProxyMode::Router,
                    _ => ProxyMode::Sidecar,
                };
            }
            if !args.is_empty() {
                return ProxyMode::Sidecar;
            }
        }
    }

    if main.iter().chain(init).any(is_envoy_container) {
        return ProxyMode::Sidecar;
    }

    ProxyMode::None
}

/// True iff any main or init container matches the envoy heuristics.
pub fn has_envoy(pod: &k8s::Pod) -> bool {
    let spec = pod.spec.as_ref();
    let main = spec.map(|s| s.containers.as_slice()).unwrap_or_default();
    let init = spec
        .and_then(|s| s.init_containers.as_deref())
        .unwrap_or_default();
    main.iter().chain(init).any(is_envoy_container)
}
