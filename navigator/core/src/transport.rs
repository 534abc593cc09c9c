//! The edge↔manager streaming contract.
//!
//! The wire adapter (a bidirectional streaming RPC) is an external
//! collaborator; this module fixes the messages it must carry and models a
//! live connection as a pair of bounded unidirectional queues, each drained
//! by its own task. Backpressure is the outbound queue's capacity: a full
//! queue blocks the periodic producer.

use crate::{ClusterSnapshot, ProxyMode, ServicePairMetrics, TimeWindow};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A targeted metric query dispatched by the manager to one edge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionQuery {
    pub service: String,
    pub namespace: String,
    pub proxy_mode: ProxyMode,
    pub window: TimeWindow,
}

/// Messages an edge sends to the manager.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EdgeMessage {
    /// A complete cycle snapshot. `seq` is monotonic per cluster.
    Snapshot {
        seq: u64,
        snapshot: Box<ClusterSnapshot>,
    },

    /// The reply to a [`ManagerMessage::QueryMetrics`] with the same id.
    Metrics {
        request_id: u64,
        result: Result<Vec<ServicePairMetrics>, String>,
    },
}

/// Messages the manager sends to an edge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ManagerMessage {
    QueryMetrics {
        request_id: u64,
        query: ConnectionQuery,
    },
}

/// The edge's half of a live connection.
#[derive(Debug)]
pub struct EdgeConnection {
    pub tx: mpsc::Sender<EdgeMessage>,
    pub rx: mpsc::Receiver<ManagerMessage>,
}

/// The manager's half of a live connection.
#[derive(Debug)]
pub struct ManagerConnection {
    pub cluster: String,
    pub tx: mpsc::Sender<ManagerMessage>,
    pub rx: mpsc::Receiver<EdgeMessage>,
}

/// Dials the manager on behalf of one cluster's edge.
///
/// Implementations reconnect at the transport layer; the orchestrator calls
/// `connect` anew after a stream is lost.
#[async_trait::async_trait]
pub trait ManagerTransport: Send + Sync {
    async fn connect(&self, cluster: &str) -> anyhow::Result<EdgeConnection>;
}

/// Builds an in-process connection pair, one half per peer.
pub fn duplex(cluster: impl Into<String>, capacity: usize) -> (EdgeConnection, ManagerConnection) {
    let (edge_tx, manager_rx) = mpsc::channel(capacity);
    let (manager_tx, edge_rx) = mpsc::channel(capacity);
    (
        EdgeConnection {
            tx: edge_tx,
            rx: edge_rx,
        },
        ManagerConnection {
            cluster: cluster.into(),
            tx: manager_tx,
            rx: manager_rx,
        },
    )
}
