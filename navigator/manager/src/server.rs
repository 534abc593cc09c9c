use crate::{aggregator::Aggregator, registry::ConnectionRegistry};
use ahash::AHashMap as HashMap;
use navigator_core::{
    transport::{ConnectionQuery, EdgeMessage, ManagerConnection, ManagerMessage},
    ServicePairMetrics,
};
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, info_span, warn, Instrument};

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no connected edge for cluster {0:?}")]
    NoEdge(String),

    #[error("edge for cluster {0:?} went away")]
    EdgeGone(String),

    #[error("metric query timed out")]
    Timeout,

    #[error("edge reported: {0}")]
    Edge(String),
}

/// Binds the connection registry and the aggregator behind the edge streams:
/// one inbound-drain task per attached edge, plus request/response
/// correlation for targeted metric queries.
pub struct Manager {
    registry: Arc<ConnectionRegistry>,
    aggregator: Arc<Aggregator>,
    edges: Mutex<HashMap<String, mpsc::Sender<ManagerMessage>>>,
    pending: Arc<Mutex<HashMap<u64, PendingReply>>>,
    next_request: AtomicU64,
    query_timeout: Duration,
}

type PendingReply = oneshot::Sender<Result<Vec<ServicePairMetrics>, String>>;

// === impl Manager ===

impl Default for Manager {
    fn default() -> Self {
        Self::new(
            Arc::new(ConnectionRegistry::default()),
            Arc::new(Aggregator::default()),
        )
    }
}

impl Manager {
    pub fn new(registry: Arc<ConnectionRegistry>, aggregator: Arc<Aggregator>) -> Self {
        Self {
            registry,
            aggregator,
            edges: Mutex::new(HashMap::default()),
            pending: Arc::new(Mutex::new(HashMap::default())),
            next_request: AtomicU64::new(1),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    /// Accepts one edge stream: registers it and spawns its inbound drain
    /// task. The task exits when the stream closes, the connection is
    /// replaced, or the registry token is cancelled.
    pub fn attach(self: &Arc<Self>, mut conn: ManagerConnection) {
        let cluster = conn.cluster.clone();
        let token = self.registry.attach(&cluster);
        self.edges.lock().insert(cluster.clone(), conn.tx.clone());
        info!(%cluster, "edge attached");

        let manager = self.clone();
        let span = info_span!("edge", %cluster);
        tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        msg = conn.rx.recv() => match msg {
                            None => break,
                            Some(msg) => manager.handle_message(&conn.cluster, msg),
                        },
                    }
                }
                manager.registry.detach(&conn.cluster, &token);
                info!("edge stream ended");
            }
            .instrument(span),
        );
    }

    fn handle_message(&self, cluster: &str, msg: EdgeMessage) {
        match msg {
            EdgeMessage::Snapshot { seq, snapshot } => {
                if snapshot.cluster != cluster {
                    warn!(
                        claimed = %snapshot.cluster,
                        "dropping snapshot claiming a foreign cluster"
                    );
                    return;
                }
                self.registry
                    .record_snapshot(cluster, seq, snapshot.services.len());
                self.aggregator.apply(*snapshot);
            }
            EdgeMessage::Metrics { request_id, result } => {
                let Some(reply) = self.pending.lock().remove(&request_id) else {
                    warn!(request_id, "reply for unknown or expired metric query");
                    return;
                };
                let _ = reply.send(result);
            }
        }
    }

    /// Dispatches a targeted metric query to the cluster's edge and awaits
    /// the correlated reply.
    pub async fn query_connections(
        &self,
        cluster: &str,
        query: ConnectionQuery,
    ) -> Result<Vec<ServicePairMetrics>, DispatchError> {
        let tx = self
            .edges
            .lock()
            .get(cluster)
            .cloned()
            .ok_or_else(|| DispatchError::NoEdge(cluster.to_string()))?;

        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().insert(request_id, reply_tx);

        if tx
            .send(ManagerMessage::QueryMetrics { request_id, query })
            .await
            .is_err()
        {
            self.pending.lock().remove(&request_id);
            return Err(DispatchError::EdgeGone(cluster.to_string()));
        }

        match tokio::time::timeout(self.query_timeout, reply_rx).await {
            Ok(Ok(Ok(metrics))) => Ok(metrics),
            Ok(Ok(Err(message))) => Err(DispatchError::Edge(message)),
            Ok(Err(_)) => Err(DispatchError::EdgeGone(cluster.to_string())),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                Err(DispatchError::Timeout)
            }
        }
    }

    /// The edge, if any, currently serving the cluster.
    pub fn has_edge(&self, cluster: &str) -> bool {
        self.edges.lock().contains_key(cluster)
    }
}
