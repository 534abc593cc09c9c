use serde::{Deserialize, Serialize};

/// How a workload participates in the mesh data plane.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProxyMode {
    /// The pod could not be inspected.
    #[default]
    Unknown,

    /// No proxy container was found.
    None,

    /// An envoy sidecar (or waypoint) proxies the pod's traffic.
    Sidecar,

    /// The pod is itself a gateway proxy.
    Router,
}

// === impl ProxyMode ===

impl ProxyMode {
    /// Ranks modes for cross-instance aggregation: a service with any router
    /// instance is a router, else any sidecar instance makes it sidecared.
    pub fn priority(self) -> u8 {
        match self {
            ProxyMode::Router => 3,
            ProxyMode::Sidecar => 2,
            ProxyMode::Unknown => 1,
            ProxyMode::None => 0,
        }
    }

    /// Derives a service-wide mode from its instances' modes.
    pub fn aggregate(modes: impl IntoIterator<Item = ProxyMode>) -> ProxyMode {
        modes
            .into_iter()
            .max_by_key(|m| m.priority())
            .unwrap_or(ProxyMode::Unknown)
    }

    pub fn is_router(self) -> bool {
        matches!(self, ProxyMode::Router)
    }
}

impl std::fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyMode::Unknown => "UNKNOWN".fmt(f),
            ProxyMode::None => "NONE".fmt(f),
            ProxyMode::Sidecar => "SIDECAR".fmt(f),
            ProxyMode::Router => "ROUTER".fmt(f),
        }
    }
}

impl std::str::FromStr for ProxyMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "UNKNOWN" => Ok(ProxyMode::Unknown),
            "NONE" => Ok(ProxyMode::None),
            "SIDECAR" => Ok(ProxyMode::Sidecar),
            "ROUTER" => Ok(ProxyMode::Router),
            s => anyhow::bail!("invalid proxy mode: {s}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_prefers_router() {
        let modes = [ProxyMode::Sidecar, ProxyMode::Router, ProxyMode::None];
        assert_eq!(ProxyMode::aggregate(modes), ProxyMode::Router);
    }

    #[test]
    fn aggregate_of_nothing_is_unknown() {
        assert_eq!(ProxyMode::aggregate([]), ProxyMode::Unknown);
    }

    #[test]
    fn aggregate_all_none_stays_none() {
        assert_eq!(
            ProxyMode::aggregate([ProxyMode::None, ProxyMode::None]),
            ProxyMode::None
        );
    }
}
