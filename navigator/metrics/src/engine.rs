use crate::{
    client::{PrometheusClient, QueryError},
    pairs,
    query::{build_queries, QueryKind},
};
use ahash::AHashMap as HashMap;
use anyhow::{bail, Result};
use navigator_core::{ProxyMode, ServicePairMetrics, TimeWindow};
use std::{collections::BTreeSet, sync::Arc};
use tokio_util::sync::CancellationToken;

/// One targeted metric lookup.
#[derive(Clone, Debug)]
pub struct ServiceTarget {
    pub service: String,
    pub namespace: String,
    pub proxy_mode: ProxyMode,
    pub window: TimeWindow,

    /// Source namespaces to restrict the istio queries to; empty means all.
    pub filter_namespaces: BTreeSet<String>,
}

/// Fans out the per-direction query set for a service and merges the
/// responses into pair-keyed records.
pub struct MetricsEngine {
    client: Arc<PrometheusClient>,
    cluster: String,
}

// === impl MetricsEngine ===

impl MetricsEngine {
    pub fn new(client: PrometheusClient, cluster: impl Into<String>) -> Self {
        Self {
            client: Arc::new(client),
            cluster: cluster.into(),
        }
    }

    /// Resolves the service's traffic pairs over the target window.
    ///
    /// Every query runs concurrently under the shared cancellation token. A
    /// failed query suppresses only its own signal: the merged records carry
    /// zero for it while the other signals are preserved.
    pub async fn service_connections(
        &self,
        target: &ServiceTarget,
        cancel: &CancellationToken,
    ) -> Result<Vec<ServicePairMetrics>> {
        let queries = build_queries(
            &target.service,
            &target.namespace,
            target.proxy_mode,
            target.window,
            &target.filter_namespaces,
        );

        let tasks: Vec<_> = queries
            .into_iter()
            .map(|(kind, promql)| {
                let client = self.client.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if cancel.is_cancelled() {
                        return (kind, Err(Cancelled.into()));
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => (kind, Err(Cancelled.into())),
                        res = client.query(&promql) => (kind, res),
                    }
                })
            })
            .collect();

        let downstream = pairs::downstream_pair(&self.cluster, &target.namespace, &target.service);
        let mut requests = HashMap::default();
        let mut errors = HashMap::default();
        let mut buckets = pairs::BucketAccumulator::default();

        for joined in futures::future::join_all(tasks).await {
            let (kind, result) = joined?;
            let samples = match result {
                Ok(samples) => samples,
                Err(QueryError::Token(error)) => {
                    tracing::warn!(query = %kind, %error, "token acquisition failed; skipping signal");
                    continue;
                }
                Err(error) => {
                    tracing::warn!(query = %kind, %error, "metric signal failed; reporting zero");
                    continue;
                }
            };

            match kind {
                QueryKind::InboundRequestRate | QueryKind::OutboundRequestRate => {
                    pairs::accumulate_rates(&mut requests, &samples)
                }
                QueryKind::InboundErrorRate | QueryKind::OutboundErrorRate => {
                    pairs::accumulate_rates(&mut errors, &samples)
                }
                QueryKind::InboundLatency | QueryKind::OutboundLatency => {
                    pairs::accumulate_buckets(&mut buckets, &samples)
                }
                QueryKind::DownstreamRequestRate if !samples.is_empty() => {
                    *requests.entry(downstream.clone()).or_insert(0.0) +=
                        pairs::sum_values(&samples)
                }
                QueryKind::DownstreamRequestRate => {}
                QueryKind::DownstreamLatency => {
                    pairs::accumulate_downstream_buckets(&mut buckets, &downstream, &samples)
                }
            }
        }

        if cancel.is_cancelled() {
            bail!("metrics fan-out cancelled");
        }

        Ok(pairs::merge_signals(
            requests,
            errors,
            pairs::build_distributions(buckets),
        ))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("query cancelled")]
struct Cancelled;

impl From<Cancelled> for QueryError {
    fn from(c: Cancelled) -> Self {
        QueryError::Rejected(c.to_string())
    }
}
