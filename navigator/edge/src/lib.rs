#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! The edge orchestrator: drives the periodic snapshot cycle, streams
//! snapshots to the manager, serves the manager's targeted metric queries,
//! and reconnects with jittered exponential backoff.

mod backoff;

pub use self::backoff::Backoff;

use anyhow::{anyhow, bail, Result};
use navigator_core::{
    transport::{ConnectionQuery, EdgeConnection, EdgeMessage, ManagerMessage, ManagerTransport},
    ClusterSnapshot, ServicePairMetrics,
};
use navigator_k8s_snapshot::SnapshotBuilder;
use navigator_metrics::{MetricsEngine, ServiceTarget};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(15);

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Produces one cluster snapshot per cycle.
#[async_trait::async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    fn cluster(&self) -> &str;

    async fn snapshot(&self, cancel: &CancellationToken) -> Result<ClusterSnapshot>;
}

#[async_trait::async_trait]
impl SnapshotSource for SnapshotBuilder {
    fn cluster(&self) -> &str {
        SnapshotBuilder::cluster(self)
    }

    async fn snapshot(&self, cancel: &CancellationToken) -> Result<ClusterSnapshot> {
        self.build(cancel).await
    }
}

/// Answers the manager's targeted connection queries.
#[async_trait::async_trait]
pub trait ConnectionMetrics: Send + Sync + 'static {
    async fn service_connections(
        &self,
        target: &ServiceTarget,
        cancel: &CancellationToken,
    ) -> Result<Vec<ServicePairMetrics>>;
}

#[async_trait::async_trait]
impl ConnectionMetrics for MetricsEngine {
    async fn service_connections(
        &self,
        target: &ServiceTarget,
        cancel: &CancellationToken,
    ) -> Result<Vec<ServicePairMetrics>> {
        MetricsEngine::service_connections(self, target, cancel).await
    }
}

/// One cluster's edge process.
pub struct Edge<S> {
    source: Arc<S>,
    metrics: Option<Arc<dyn ConnectionMetrics>>,
    transport: Arc<dyn ManagerTransport>,
    period: Duration,
}

// === impl Edge ===

impl<S: SnapshotSource> Edge<S> {
    pub fn new(source: S, transport: Arc<dyn ManagerTransport>, period: Duration) -> Self {
        Self {
            source: Arc::new(source),
            metrics: None,
            transport,
            period,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn ConnectionMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runs until the token fires: connect, stream snapshots, reconnect on
    /// loss. No snapshots are buffered across reconnects; the next cycle
    /// starts fresh on the new stream.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let cluster = self.source.cluster().to_string();
        let mut backoff = Backoff::new(BACKOFF_BASE, BACKOFF_CAP);
        let mut seq: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let conn = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                res = self.transport.connect(&cluster) => res,
            };
            let conn = match conn {
                Ok(conn) => {
                    info!(%cluster, "connected to manager");
                    backoff.reset();
                    conn
                }
                Err(error) => {
                    let delay = backoff.next_delay();
                    warn!(%cluster, %error, ?delay, "manager connection failed");
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            match self.session(conn, &mut seq, &cancel).await {
                Ok(()) => return Ok(()),
                Err(error) => {
                    let delay = backoff.next_delay();
                    warn!(%cluster, %error, ?delay, "manager stream lost; reconnecting");
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Drives one connected stream until it breaks or shutdown is signaled.
    async fn session(
        &self,
        mut conn: EdgeConnection,
        seq: &mut u64,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),

                _ = ticker.tick() => {
                    // A failed cycle is dropped, not streamed; the next tick
                    // retries from scratch.
                    match self.source.snapshot(cancel).await {
                        Ok(snapshot) => {
                            *seq += 1;
                            conn.tx
                                .send(EdgeMessage::Snapshot {
                                    seq: *seq,
                                    snapshot: Box::new(snapshot),
                                })
                                .await
                                .map_err(|_| anyhow!("manager snapshot stream closed"))?;
                        }
                        Err(error) => {
                            if cancel.is_cancelled() {
                                return Ok(());
                            }
                            warn!(%error, "snapshot cycle failed; retrying next tick");
                        }
                    }
                }

                msg = conn.rx.recv() => match msg {
                    None => bail!("manager request stream closed"),
                    Some(ManagerMessage::QueryMetrics { request_id, query }) => {
                        self.spawn_query(request_id, query, conn.tx.clone(), cancel.clone());
                    }
                },
            }
        }
    }

    fn spawn_query(
        &self,
        request_id: u64,
        query: ConnectionQuery,
        tx: mpsc::Sender<EdgeMessage>,
        cancel: CancellationToken,
    ) {
        let Some(metrics) = self.metrics.clone() else {
            tokio::spawn(async move {
                let _ = tx
                    .send(EdgeMessage::Metrics {
                        request_id,
                        result: Err("edge has no metrics backend configured".to_string()),
                    })
                    .await;
            });
            return;
        };

        tokio::spawn(async move {
            let target = ServiceTarget {
                service: query.service,
                namespace: query.namespace,
                proxy_mode: query.proxy_mode,
                window: query.window,
                filter_namespaces: Default::default(),
            };
            let result = metrics
                .service_connections(&target, &cancel)
                .await
                .map_err(|e| format!("{e:#}"));
            if let Err(error) = &result {
                warn!(request_id, %error, "targeted metric query failed");
            }
            let _ = tx.send(EdgeMessage::Metrics { request_id, result }).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navigator_core::transport::{duplex, ManagerConnection};
    use navigator_core::ProxyMode;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct StubSource;

    #[async_trait::async_trait]
    impl SnapshotSource for StubSource {
        fn cluster(&self) -> &str {
            "east"
        }

        async fn snapshot(&self, _cancel: &CancellationToken) -> Result<ClusterSnapshot> {
            Ok(ClusterSnapshot::new("east"))
        }
    }

    struct StubMetrics;

    #[async_trait::async_trait]
    impl ConnectionMetrics for StubMetrics {
        async fn service_connections(
            &self,
            _target: &ServiceTarget,
            _cancel: &CancellationToken,
        ) -> Result<Vec<ServicePairMetrics>> {
            Ok(vec![])
        }
    }

    /// Yields the scripted dial outcomes in order (`None` is a connect
    /// failure, as is an exhausted queue) and records when each dial landed.
    struct QueueTransport {
        connections: Mutex<VecDeque<Option<EdgeConnection>>>,
        dials: Mutex<Vec<tokio::time::Instant>>,
    }

    #[async_trait::async_trait]
    impl ManagerTransport for QueueTransport {
        async fn connect(&self, _cluster: &str) -> Result<EdgeConnection> {
            self.dials.lock().push(tokio::time::Instant::now());
            match self.connections.lock().pop_front() {
                Some(Some(conn)) => Ok(conn),
                _ => Err(anyhow!("manager unreachable")),
            }
        }
    }

    fn mk_transport(conns: Vec<Option<EdgeConnection>>) -> Arc<QueueTransport> {
        Arc::new(QueueTransport {
            connections: Mutex::new(conns.into()),
            dials: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn snapshots_stream_with_monotonic_sequence_numbers() {
        let (edge_conn, mut manager): (EdgeConnection, ManagerConnection) = duplex("east", 8);
        let transport = mk_transport(vec![Some(edge_conn)]);
        let edge = Edge::new(StubSource, transport, Duration::from_secs(15));

        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let cancel = cancel.clone();
            async move { edge.run(cancel).await }
        });

        let mut last_seq = 0;
        for _ in 0..3 {
            match manager.rx.recv().await.expect("stream open") {
                EdgeMessage::Snapshot { seq, snapshot } => {
                    assert!(seq > last_seq, "sequence must be monotonic");
                    last_seq = seq;
                    assert_eq!(snapshot.cluster, "east");
                }
                other => panic!("unexpected message: {other:?}"),
            }
        }

        cancel.cancel();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn metric_queries_round_trip() {
        let (edge_conn, mut manager) = duplex("east", 8);
        let transport = mk_transport(vec![Some(edge_conn)]);
        let edge = Edge::new(StubSource, transport, Duration::from_secs(15))
            .with_metrics(Arc::new(StubMetrics));

        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let cancel = cancel.clone();
            async move { edge.run(cancel).await }
        });

        manager
            .tx
            .send(ManagerMessage::QueryMetrics {
                request_id: 7,
                query: ConnectionQuery {
                    service: "backend".to_string(),
                    namespace: "shop".to_string(),
                    proxy_mode: ProxyMode::Sidecar,
                    window: navigator_core::TimeWindow::last_seconds(300),
                },
            })
            .await
            .unwrap();

        loop {
            match manager.rx.recv().await.expect("stream open") {
                EdgeMessage::Metrics { request_id, result } => {
                    assert_eq!(request_id, 7);
                    assert_eq!(result.unwrap(), vec![]);
                    break;
                }
                EdgeMessage::Snapshot { .. } => continue,
            }
        }

        cancel.cancel();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn a_lost_stream_reconnects() {
        let (first, first_manager) = duplex("east", 8);
        let (second, mut second_manager) = duplex("east", 8);
        let transport = mk_transport(vec![Some(first), Some(second)]);
        let edge = Edge::new(StubSource, transport, Duration::from_secs(15));

        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let cancel = cancel.clone();
            async move { edge.run(cancel).await }
        });

        // Kill the first stream; the edge must back off and redial.
        drop(first_manager);

        match second_manager.rx.recv().await.expect("reconnected stream") {
            EdgeMessage::Snapshot { snapshot, .. } => assert_eq!(snapshot.cluster, "east"),
            other => panic!("unexpected message: {other:?}"),
        }

        cancel.cancel();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_restarts_from_the_base_after_a_successful_connect() {
        // A stream that is already dead on arrival, reached after two failed
        // dials, then a healthy one.
        let (dead, dead_manager) = duplex("east", 8);
        drop(dead_manager);
        let (live, mut live_manager) = duplex("east", 8);
        let transport = mk_transport(vec![None, None, Some(dead), Some(live)]);
        let edge = Edge::new(StubSource, transport.clone(), Duration::from_secs(15));

        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let cancel = cancel.clone();
            async move { edge.run(cancel).await }
        });

        match live_manager.rx.recv().await.expect("healthy stream") {
            EdgeMessage::Snapshot { snapshot, .. } => assert_eq!(snapshot.cluster, "east"),
            other => panic!("unexpected message: {other:?}"),
        }

        // The two failures escalate the delay, but the successful third dial
        // resets it: losing the dead stream redials within the base step,
        // not the escalated one.
        let dials = transport.dials.lock().clone();
        assert_eq!(dials.len(), 4);
        let after_reset = dials[3] - dials[2];
        assert!(
            after_reset <= Duration::from_secs(1),
            "redial after reset took {after_reset:?}"
        );

        cancel.cancel();
        run.await.unwrap().unwrap();
    }
}
