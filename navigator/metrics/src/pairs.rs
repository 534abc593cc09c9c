use crate::client::Sample;
use ahash::AHashMap as HashMap;
use navigator_core::{LatencyDistribution, PairId, ServicePairMetrics};

const SOURCE_CLUSTER: &str = "source_cluster";
const SOURCE_NAMESPACE: &str = "source_workload_namespace";
const SOURCE_SERVICE: &str = "source_canonical_service";
const DESTINATION_CLUSTER: &str = "destination_cluster";
const DESTINATION_NAMESPACE: &str = "destination_service_namespace";
const DESTINATION_SERVICE: &str = "destination_canonical_service";

/// Cumulative bucket counts per pair, keyed by the raw `le` label until the
/// fan-out completes.
pub type BucketAccumulator = HashMap<PairId, HashMap<String, f64>>;

/// Extracts the six-tuple pair identity from a sample's labels.
///
/// Samples naming no source or destination service are skipped, and a pair
/// missing any identity field is discarded.
pub fn pair_id_from_labels(labels: &std::collections::HashMap<String, String>) -> Option<PairId> {
    let get = |key: &str| labels.get(key).cloned().unwrap_or_default();
    let id = PairId {
        src_cluster: get(SOURCE_CLUSTER),
        src_namespace: get(SOURCE_NAMESPACE),
        src_service: get(SOURCE_SERVICE),
        dst_cluster: get(DESTINATION_CLUSTER),
        dst_namespace: get(DESTINATION_NAMESPACE),
        dst_service: get(DESTINATION_SERVICE),
    };
    if id.src_service.is_empty() || id.dst_service.is_empty() {
        return None;
    }
    id.is_complete().then_some(id)
}

/// The normalized identity for a gateway's downstream traffic. The source is
/// unattributable; the destination is the gateway service itself. Both
/// downstream signals must use this same key so they land on one record.
pub fn downstream_pair(cluster: &str, namespace: &str, service: &str) -> PairId {
    PairId {
        src_cluster: "unknown".to_string(),
        src_namespace: "unknown".to_string(),
        src_service: "unknown".to_string(),
        dst_cluster: cluster.to_string(),
        dst_namespace: namespace.to_string(),
        dst_service: service.to_string(),
    }
}

/// Folds rate samples into the per-pair map, summing duplicates.
pub fn accumulate_rates(rates: &mut HashMap<PairId, f64>, samples: &[Sample]) {
    for sample in samples {
        let Some(id) = pair_id_from_labels(&sample.labels) else {
            continue;
        };
        *rates.entry(id).or_insert(0.0) += sample.value;
    }
}

/// Folds histogram-bucket samples into the accumulator, keyed by pair.
pub fn accumulate_buckets(acc: &mut BucketAccumulator, samples: &[Sample]) {
    for sample in samples {
        let Some(id) = pair_id_from_labels(&sample.labels) else {
            continue;
        };
        let Some(le) = sample.labels.get("le") else {
            continue;
        };
        *acc.entry(id).or_default().entry(le.clone()).or_insert(0.0) += sample.value;
    }
}

/// Sums every sample's value; the downstream request-rate samples are keyed
/// by `(pod, namespace)` and all collapse onto the gateway's pair.
pub fn sum_values(samples: &[Sample]) -> f64 {
    samples.iter().map(|s| s.value).sum()
}

/// Folds downstream bucket samples (per pod) onto the gateway's pair key.
pub fn accumulate_downstream_buckets(
    acc: &mut BucketAccumulator,
    pair: &PairId,
    samples: &[Sample],
) {
    let buckets = acc.entry(pair.clone()).or_default();
    for sample in samples {
        let Some(le) = sample.labels.get("le") else {
            continue;
        };
        *buckets.entry(le.clone()).or_insert(0.0) += sample.value;
    }
}

/// Finalizes accumulated buckets into distributions. Unparseable `le`
/// bounds are dropped; `+Inf` parses to infinity and is excluded from the
/// stored buckets while still informing the total.
pub fn build_distributions(acc: BucketAccumulator) -> HashMap<PairId, LatencyDistribution> {
    acc.into_iter()
        .map(|(id, buckets)| {
            let samples = buckets
                .into_iter()
                .filter_map(|(le, count)| le.parse::<f64>().ok().map(|le| (le, count)));
            (id, LatencyDistribution::from_cumulative(samples))
        })
        .filter(|(_, d)| d.total_count > 0.0)
        .collect()
}

/// Joins the three per-signal maps into the merged records: any key present
/// anywhere produces an entry, missing signals default to zero, and latency
/// distributions are carried forward verbatim.
pub fn merge_signals(
    requests: HashMap<PairId, f64>,
    errors: HashMap<PairId, f64>,
    latencies: HashMap<PairId, LatencyDistribution>,
) -> Vec<ServicePairMetrics> {
    let mut merged: HashMap<PairId, ServicePairMetrics> = HashMap::default();

    for (id, rate) in requests {
        merged.entry(id.clone()).or_insert_with(|| blank(&id)).request_rate = rate;
    }
    for (id, rate) in errors {
        merged.entry(id.clone()).or_insert_with(|| blank(&id)).error_rate = rate;
    }
    for (id, distribution) in latencies {
        let entry = merged.entry(id.clone()).or_insert_with(|| blank(&id));
        entry.p99_latency_ms = distribution.p99();
        entry.latency = Some(distribution);
    }

    let mut out: Vec<ServicePairMetrics> = merged.into_values().collect();
    out.sort_by_key(|m| m.pair.to_string());
    out
}

fn blank(id: &PairId) -> ServicePairMetrics {
    ServicePairMetrics {
        pair: id.clone(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;

    fn sample(labels: std::collections::HashMap<String, String>, value: f64) -> Sample {
        Sample { labels, value }
    }

    fn pair_labels(src: &str, dst: &str) -> std::collections::HashMap<String, String> {
        hashmap! {
            SOURCE_CLUSTER.to_string() => "Kubernetes".to_string(),
            SOURCE_NAMESPACE.to_string() => "microservices".to_string(),
            SOURCE_SERVICE.to_string() => src.to_string(),
            DESTINATION_CLUSTER.to_string() => "Kubernetes".to_string(),
            DESTINATION_NAMESPACE.to_string() => "microservices".to_string(),
            DESTINATION_SERVICE.to_string() => dst.to_string(),
        }
    }

    #[test]
    fn pair_key_matches_the_documented_format() {
        let id = pair_id_from_labels(&pair_labels("frontend", "backend")).unwrap();
        assert_eq!(
            id.to_string(),
            "Kubernetes:microservices:frontend->Kubernetes:microservices:backend"
        );
    }

    #[test]
    fn samples_without_service_identity_are_skipped() {
        let mut labels = pair_labels("frontend", "backend");
        labels.remove(DESTINATION_SERVICE);
        assert!(pair_id_from_labels(&labels).is_none());

        let mut labels = pair_labels("frontend", "backend");
        labels.insert(SOURCE_SERVICE.to_string(), String::new());
        assert!(pair_id_from_labels(&labels).is_none());
    }

    #[test]
    fn samples_missing_any_identity_field_are_discarded() {
        let mut labels = pair_labels("frontend", "backend");
        labels.remove(SOURCE_CLUSTER);
        assert!(pair_id_from_labels(&labels).is_none());
    }

    #[test]
    fn inbound_and_outbound_rates_never_double_count() {
        let mut rates = HashMap::default();
        // reporter="destination" query observed A->B.
        accumulate_rates(&mut rates, &[sample(pair_labels("a", "b"), 15.0)]);
        // reporter="source" query observed B->C.
        accumulate_rates(&mut rates, &[sample(pair_labels("b", "c"), 15.0)]);

        let merged = merge_signals(rates, HashMap::default(), HashMap::default());
        assert_eq!(merged.len(), 2);
        for m in &merged {
            assert_eq!(m.request_rate, 15.0);
            assert_eq!(m.error_rate, 0.0);
        }
    }

    #[test]
    fn missing_signals_default_to_zero() {
        let mut errors = HashMap::default();
        accumulate_rates(&mut errors, &[sample(pair_labels("a", "b"), 0.25)]);
        let merged = merge_signals(HashMap::default(), errors, HashMap::default());
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].request_rate, 0.0);
        assert_eq!(merged[0].error_rate, 0.25);
        assert!(merged[0].latency.is_none());
    }

    #[test]
    fn bucket_samples_assemble_into_distributions() {
        let mut acc = BucketAccumulator::default();
        for (le, count) in [("1", 10.0), ("5", 50.0), ("10", 99.0), ("25", 100.0), ("+Inf", 100.0)]
        {
            let mut labels = pair_labels("a", "b");
            labels.insert("le".to_string(), le.to_string());
            accumulate_buckets(&mut acc, &[sample(labels, count)]);
        }

        let distributions = build_distributions(acc);
        let id = pair_id_from_labels(&pair_labels("a", "b")).unwrap();
        let d = distributions.get(&id).unwrap();
        assert_eq!(d.buckets.len(), 4);
        assert_eq!(d.total_count, 100.0);
        let p99 = d.p99();
        assert!(p99 >= 10.0 - 1e-9 && p99 < 25.0, "p99 = {p99}");
    }

    #[test]
    fn downstream_signals_share_one_record() {
        let pair = downstream_pair("Kubernetes", "istio-system", "ingress");

        let mut rates = HashMap::default();
        let by_pod = |pod: &str, value: f64| {
            sample(
                hashmap! {
                    "pod".to_string() => pod.to_string(),
                    "namespace".to_string() => "istio-system".to_string(),
                },
                value,
            )
        };
        *rates.entry(pair.clone()).or_insert(0.0) +=
            sum_values(&[by_pod("gw-0", 5.0), by_pod("gw-1", 7.0)]);

        let mut acc = BucketAccumulator::default();
        for pod in ["gw-0", "gw-1"] {
            for (le, count) in [("10", 4.0), ("100", 6.0)] {
                let mut labels = hashmap! {
                    "pod".to_string() => pod.to_string(),
                    "namespace".to_string() => "istio-system".to_string(),
                };
                labels.insert("le".to_string(), le.to_string());
                accumulate_downstream_buckets(&mut acc, &pair, &[sample(labels, count)]);
            }
        }

        let merged = merge_signals(rates, HashMap::default(), build_distributions(acc));
        assert_eq!(merged.len(), 1, "both signals must coalesce onto one pair");
        let m = &merged[0];
        assert_eq!(m.pair, pair);
        assert_eq!(m.request_rate, 12.0);
        let d = m.latency.as_ref().unwrap();
        assert_eq!(d.total_count, 12.0);
    }

    #[test]
    fn merged_output_is_deterministically_ordered() {
        let mut rates = HashMap::default();
        accumulate_rates(
            &mut rates,
            &[
                sample(pair_labels("b", "c"), 1.0),
                sample(pair_labels("a", "b"), 2.0),
            ],
        );
        let merged = merge_signals(rates, HashMap::default(), HashMap::default());
        assert!(merged[0].pair.to_string() < merged[1].pair.to_string());
    }
}
