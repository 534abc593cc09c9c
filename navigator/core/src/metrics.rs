use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one directed service pair across clusters.
///
/// All six fields must be non-empty for the pair to be reportable; samples
/// missing any identity label are discarded upstream.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairId {
    pub src_cluster: String,
    pub src_namespace: String,
    pub src_service: String,
    pub dst_cluster: String,
    pub dst_namespace: String,
    pub dst_service: String,
}

/// Aggregated traffic statistics for one service pair.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServicePairMetrics {
    pub pair: PairId,

    /// Requests per second over the queried window.
    pub request_rate: f64,

    /// Errored (0/4xx/5xx) requests per second.
    pub error_rate: f64,

    pub p99_latency_ms: f64,

    pub latency: Option<LatencyDistribution>,
}

/// An assembled latency histogram.
///
/// `sum` is approximated from bucket midpoints and is only suitable for
/// rough totals; consumers wanting a tail statistic should use
/// [`LatencyDistribution::quantile`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyDistribution {
    /// Cumulative buckets, strictly increasing in `le`; the `+Inf` bucket is
    /// not stored.
    pub buckets: Vec<LatencyBucket>,
    pub total_count: f64,
    pub sum: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyBucket {
    pub le: f64,
    pub count: f64,
}

/// A closed query interval.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

// === impl PairId ===

impl PairId {
    pub fn is_complete(&self) -> bool {
        !(self.src_cluster.is_empty()
            || self.src_namespace.is_empty()
            || self.src_service.is_empty()
            || self.dst_cluster.is_empty()
            || self.dst_namespace.is_empty()
            || self.dst_service.is_empty())
    }
}

impl std::fmt::Display for PairId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}->{}:{}:{}",
            self.src_cluster,
            self.src_namespace,
            self.src_service,
            self.dst_cluster,
            self.dst_namespace,
            self.dst_service
        )
    }
}

// === impl LatencyDistribution ===

impl LatencyDistribution {
    /// Assembles a distribution from cumulative `(le, count)` samples.
    ///
    /// Buckets are sorted by `le`; non-finite bounds (the `+Inf` bucket) are
    /// excluded from the stored sequence but still inform `total_count`,
    /// which is the largest cumulative count observed.
    pub fn from_cumulative(samples: impl IntoIterator<Item = (f64, f64)>) -> Self {
        let mut total: f64 = 0.0;
        let mut buckets = Vec::new();
        for (le, count) in samples {
            total = total.max(count);
            if le.is_finite() {
                buckets.push(LatencyBucket { le, count });
            }
        }
        buckets.sort_by(|a, b| a.le.total_cmp(&b.le));
        buckets.dedup_by(|next, prev| {
            if next.le == prev.le {
                prev.count = prev.count.max(next.count);
                true
            } else {
                false
            }
        });

        let mut sum = 0.0;
        let mut prev_le = 0.0;
        let mut prev_count = 0.0;
        for b in &buckets {
            sum += (b.count - prev_count) * (prev_le + b.le) / 2.0;
            prev_le = b.le;
            prev_count = b.count;
        }

        Self {
            buckets,
            total_count: total,
            sum,
        }
    }

    /// Interpolated quantile in the bucket bounds' unit.
    ///
    /// Returns 0 when the distribution holds fewer than two buckets or no
    /// observations.
    pub fn quantile(&self, q: f64) -> f64 {
        if self.buckets.len() < 2 || self.total_count <= 0.0 {
            return 0.0;
        }

        let rank = q * self.total_count;
        let mut prev_le = 0.0;
        let mut prev_count = 0.0;
        for b in &self.buckets {
            if b.count >= rank {
                if b.count == prev_count {
                    return b.le;
                }
                return prev_le + (b.le - prev_le) * (rank - prev_count) / (b.count - prev_count);
            }
            prev_le = b.le;
            prev_count = b.count;
        }

        // The rank falls past the last finite bucket.
        self.buckets.last().map(|b| b.le).unwrap_or(0.0)
    }

    pub fn p99(&self) -> f64 {
        self.quantile(0.99)
    }
}

// === impl TimeWindow ===

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The window ending now and spanning the given number of seconds.
    pub fn last_seconds(secs: i64) -> Self {
        let end = Utc::now();
        Self {
            start: end - chrono::Duration::seconds(secs),
            end,
        }
    }

    pub fn duration(&self) -> std::time::Duration {
        (self.end - self.start)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dist(buckets: &[(f64, f64)]) -> LatencyDistribution {
        LatencyDistribution::from_cumulative(buckets.iter().copied())
    }

    #[test]
    fn p99_interpolates_within_the_covering_bucket() {
        let d = dist(&[(1.0, 10.0), (5.0, 50.0), (10.0, 99.0), (25.0, 100.0)]);
        assert_eq!(d.total_count, 100.0);
        let p99 = d.p99();
        assert!(p99 > 5.0 && p99 <= 25.0, "p99 = {p99}");
        assert!((p99 - 10.0).abs() < 1e-9, "p99 = {p99}");
    }

    #[test]
    fn p99_of_empty_or_single_bucket_is_zero() {
        assert_eq!(dist(&[]).p99(), 0.0);
        assert_eq!(dist(&[(10.0, 100.0)]).p99(), 0.0);
    }

    #[test]
    fn p99_never_exceeds_the_largest_finite_bound() {
        let d = dist(&[(1.0, 1.0), (2.0, 2.0), (f64::INFINITY, 50.0)]);
        assert_eq!(d.total_count, 50.0);
        assert!(d.p99() <= 2.0);
    }

    #[test]
    fn adding_a_slower_sample_never_decreases_p99() {
        let before = dist(&[(1.0, 10.0), (5.0, 50.0), (10.0, 100.0)]);
        // One more observation, in the slowest bucket only.
        let after = dist(&[(1.0, 10.0), (5.0, 50.0), (10.0, 100.0), (25.0, 101.0)]);
        assert!(after.p99() >= before.p99());
    }

    #[test]
    fn inf_bucket_informs_total_count_but_is_not_stored() {
        let d = dist(&[(1.0, 4.0), (f64::INFINITY, 10.0)]);
        assert_eq!(d.buckets.len(), 1);
        assert_eq!(d.total_count, 10.0);
    }

    #[test]
    fn sum_uses_bucket_midpoints() {
        // 10 at <=1ms, 10 more at <=5ms: 10*0.5 + 10*3 = 35.
        let d = dist(&[(1.0, 10.0), (5.0, 20.0)]);
        assert!((d.sum - 35.0).abs() < 1e-9, "sum = {}", d.sum);
    }

    #[test]
    fn pair_id_display_matches_key_format() {
        let id = PairId {
            src_cluster: "Kubernetes".into(),
            src_namespace: "microservices".into(),
            src_service: "frontend".into(),
            dst_cluster: "Kubernetes".into(),
            dst_namespace: "microservices".into(),
            dst_service: "backend".into(),
        };
        assert_eq!(
            id.to_string(),
            "Kubernetes:microservices:frontend->Kubernetes:microservices:backend"
        );
        assert!(id.is_complete());
    }

    #[test]
    fn incomplete_pairs_are_detected() {
        let id = PairId {
            src_cluster: "Kubernetes".into(),
            ..PairId::default()
        };
        assert!(!id.is_complete());
    }
}
