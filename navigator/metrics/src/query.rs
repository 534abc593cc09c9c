use navigator_core::{ProxyMode, TimeWindow};
use std::collections::BTreeSet;
use std::time::Duration;

/// The pair-identity labels every istio query aggregates by.
const PAIR_LABELS: &str = "source_cluster, source_workload_namespace, source_canonical_service, \
     destination_cluster, destination_service_namespace, destination_canonical_service";

/// Response codes counted as errors: connection failures (0), client and
/// server errors.
const ERROR_CODES: &str = r#"response_code=~"0|4..|5..""#;

/// One query of a targeted fan-out.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum QueryKind {
    InboundRequestRate,
    OutboundRequestRate,
    InboundErrorRate,
    OutboundErrorRate,
    InboundLatency,
    OutboundLatency,
    DownstreamRequestRate,
    DownstreamLatency,
}

// === impl QueryKind ===

impl QueryKind {
    pub fn is_latency(self) -> bool {
        matches!(
            self,
            QueryKind::InboundLatency | QueryKind::OutboundLatency | QueryKind::DownstreamLatency
        )
    }

    pub fn is_error_rate(self) -> bool {
        matches!(self, QueryKind::InboundErrorRate | QueryKind::OutboundErrorRate)
    }

    pub fn is_downstream(self) -> bool {
        matches!(
            self,
            QueryKind::DownstreamRequestRate | QueryKind::DownstreamLatency
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueryKind::InboundRequestRate => "inbound_request_rate",
            QueryKind::OutboundRequestRate => "outbound_request_rate",
            QueryKind::InboundErrorRate => "inbound_error_rate",
            QueryKind::OutboundErrorRate => "outbound_error_rate",
            QueryKind::InboundLatency => "inbound_latency",
            QueryKind::OutboundLatency => "outbound_latency",
            QueryKind::DownstreamRequestRate => "downstream_request_rate",
            QueryKind::DownstreamLatency => "downstream_latency",
        }
    }
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_str().fmt(f)
    }
}

/// Builds the fan-out for one service: six istio queries, plus the two
/// envoy downstream queries when the target is a gateway.
///
/// Inbound istio queries are restricted to `reporter="destination"` and
/// outbound ones to `reporter="source"`; a request reported by both sidecars
/// must only be counted once per direction.
pub fn build_queries(
    service: &str,
    namespace: &str,
    proxy_mode: ProxyMode,
    window: TimeWindow,
    filter_namespaces: &BTreeSet<String>,
) -> Vec<(QueryKind, String)> {
    let range = range_literal(window.duration());

    // The filter restricts the peer side of each query. The inbound
    // selector already pins the destination, so the filter narrows sources;
    // the outbound selector pins the source, so it narrows destinations.
    // Reusing the source label outbound would collide with the pinned
    // matcher and never narrow anything.
    let inbound_filter = filter_clause("source_workload_namespace", filter_namespaces);
    let outbound_filter = filter_clause("destination_service_namespace", filter_namespaces);

    let inbound =
        format!(r#"reporter="destination", destination_canonical_service="{service}", destination_service_namespace="{namespace}"{inbound_filter}"#);
    let outbound =
        format!(r#"reporter="source", source_canonical_service="{service}", source_workload_namespace="{namespace}"{outbound_filter}"#);

    let rate = |selector: &str| {
        format!(
            "sum by ({PAIR_LABELS})( rate(istio_requests_total{{{selector}}}[{range}]) )"
        )
    };
    let error_rate = |selector: &str| {
        format!(
            "sum by ({PAIR_LABELS})( rate(istio_requests_total{{{selector}, {ERROR_CODES}}}[{range}]) )"
        )
    };
    let latency = |selector: &str| {
        format!(
            "sum by ({PAIR_LABELS}, le)( rate(istio_request_duration_milliseconds_bucket{{{selector}}}[{range}]) )"
        )
    };

    let mut queries = vec![
        (QueryKind::InboundRequestRate, rate(&inbound)),
        (QueryKind::OutboundRequestRate, rate(&outbound)),
        (QueryKind::InboundErrorRate, error_rate(&inbound)),
        (QueryKind::OutboundErrorRate, error_rate(&outbound)),
        (QueryKind::InboundLatency, latency(&inbound)),
        (QueryKind::OutboundLatency, latency(&outbound)),
    ];

    if proxy_mode.is_router() {
        let downstream = format!(r#"pod=~".*gateway.*", namespace="{namespace}""#);
        queries.push((
            QueryKind::DownstreamRequestRate,
            format!(
                "sum by (pod, namespace)( rate(envoy_http_downstream_rq_total{{{downstream}}}[{range}]) )"
            ),
        ));
        queries.push((
            QueryKind::DownstreamLatency,
            format!(
                "sum by (pod, namespace, le)( rate(envoy_http_downstream_rq_time_bucket{{{downstream}}}[{range}]) )"
            ),
        ));
    }

    queries
}

/// Restricts a query to peers in the given namespaces by matching `label`.
/// An empty set yields an empty clause.
pub fn filter_clause(label: &str, namespaces: &BTreeSet<String>) -> String {
    if namespaces.is_empty() {
        return String::new();
    }
    let joined = namespaces
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("|");
    format!(r#", {label}=~"{joined}""#)
}

/// Formats a PromQL range literal: whole minutes when the duration divides
/// evenly, seconds otherwise, never below one minute.
pub fn range_literal(duration: Duration) -> String {
    let secs = duration.as_secs().max(60);
    if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn window(secs: i64) -> TimeWindow {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        TimeWindow::new(start, start + chrono::Duration::seconds(secs))
    }

    #[test]
    fn range_literals_floor_and_prefer_minutes() {
        assert_eq!(range_literal(Duration::from_secs(0)), "1m");
        assert_eq!(range_literal(Duration::from_secs(59)), "1m");
        assert_eq!(range_literal(Duration::from_secs(300)), "5m");
        assert_eq!(range_literal(Duration::from_secs(90)), "90s");
    }

    #[test]
    fn filter_clause_joins_sorted_namespaces() {
        assert_eq!(filter_clause("source_workload_namespace", &BTreeSet::new()), "");
        let namespaces: BTreeSet<String> =
            ["b".to_string(), "a".to_string()].into_iter().collect();
        assert_eq!(
            filter_clause("source_workload_namespace", &namespaces),
            r#", source_workload_namespace=~"a|b""#
        );
    }

    #[test]
    fn namespace_filters_apply_to_the_variable_side_of_each_direction() {
        let namespaces: BTreeSet<String> = ["edge".to_string(), "shop".to_string()]
            .into_iter()
            .collect();
        let queries = build_queries(
            "backend",
            "shop",
            ProxyMode::Router,
            window(300),
            &namespaces,
        );

        for (kind, q) in &queries {
            match kind {
                QueryKind::InboundRequestRate
                | QueryKind::InboundErrorRate
                | QueryKind::InboundLatency => {
                    assert!(
                        q.contains(r#", source_workload_namespace=~"edge|shop""#),
                        "{kind}: {q}"
                    );
                    assert!(!q.contains("destination_service_namespace=~"), "{kind}: {q}");
                }
                QueryKind::OutboundRequestRate
                | QueryKind::OutboundErrorRate
                | QueryKind::OutboundLatency => {
                    assert!(
                        q.contains(r#", destination_service_namespace=~"edge|shop""#),
                        "{kind}: {q}"
                    );
                    // The source namespace is pinned to the target exactly
                    // once; a second matcher on it would conflict.
                    assert_eq!(q.matches("source_workload_namespace=").count(), 1, "{kind}: {q}");
                    assert!(
                        q.contains(r#"source_workload_namespace="shop""#),
                        "{kind}: {q}"
                    );
                }
                QueryKind::DownstreamRequestRate | QueryKind::DownstreamLatency => {
                    assert!(!q.contains("=~\"edge|shop\""), "{kind}: {q}");
                }
            }
        }
    }

    #[test]
    fn sidecar_targets_get_six_queries() {
        let queries = build_queries(
            "backend",
            "shop",
            ProxyMode::Sidecar,
            window(300),
            &BTreeSet::new(),
        );
        assert_eq!(queries.len(), 6);
        assert!(queries.iter().all(|(k, _)| !k.is_downstream()));
    }

    #[test]
    fn router_targets_add_downstream_queries() {
        let queries = build_queries(
            "ingress",
            "istio-system",
            ProxyMode::Router,
            window(300),
            &BTreeSet::new(),
        );
        assert_eq!(queries.len(), 8);
        let downstream: Vec<_> = queries.iter().filter(|(k, _)| k.is_downstream()).collect();
        assert_eq!(downstream.len(), 2);
        for (_, q) in downstream {
            assert!(q.contains(r#"pod=~".*gateway.*""#), "{q}");
            assert!(q.contains(r#"namespace="istio-system""#), "{q}");
        }
    }

    #[test]
    fn reporters_split_by_direction() {
        let queries = build_queries(
            "backend",
            "shop",
            ProxyMode::Sidecar,
            window(300),
            &BTreeSet::new(),
        );
        for (kind, q) in &queries {
            match kind {
                QueryKind::InboundRequestRate
                | QueryKind::InboundErrorRate
                | QueryKind::InboundLatency => {
                    assert!(q.contains(r#"reporter="destination""#), "{kind}: {q}");
                    assert!(q.contains(r#"destination_canonical_service="backend""#));
                }
                QueryKind::OutboundRequestRate
                | QueryKind::OutboundErrorRate
                | QueryKind::OutboundLatency => {
                    assert!(q.contains(r#"reporter="source""#), "{kind}: {q}");
                    assert!(q.contains(r#"source_canonical_service="backend""#));
                }
                _ => unreachable!("sidecar target must not get downstream queries"),
            }
        }
    }

    #[test]
    fn error_rate_matches_failure_codes() {
        let queries = build_queries(
            "backend",
            "shop",
            ProxyMode::Sidecar,
            window(300),
            &BTreeSet::new(),
        );
        for (kind, q) in &queries {
            assert_eq!(
                q.contains(r#"response_code=~"0|4..|5..""#),
                kind.is_error_rate(),
                "{kind}: {q}"
            );
        }
    }

    #[test]
    fn latency_queries_retain_le() {
        let queries = build_queries(
            "backend",
            "shop",
            ProxyMode::Sidecar,
            window(300),
            &BTreeSet::new(),
        );
        for (kind, q) in &queries {
            assert_eq!(q.contains(", le)"), kind.is_latency(), "{kind}: {q}");
        }
    }
}
