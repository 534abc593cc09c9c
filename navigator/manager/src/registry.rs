use ahash::AHashMap as HashMap;
use navigator_core::SyncStatus;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30);
pub const DEFAULT_DISCONNECT_AFTER: Duration = Duration::from_secs(60);

/// Tracks every attached edge's connection health.
pub struct ConnectionRegistry {
    clusters: Mutex<HashMap<String, ConnectionState>>,
    stale_after: Duration,
    disconnect_after: Duration,
}

#[derive(Debug)]
struct ConnectionState {
    #[allow(dead_code)]
    connected_at: Instant,
    last_update: Option<Instant>,
    service_count: usize,
    last_seq: u64,
    disconnected: bool,
    cancel: CancellationToken,
}

/// A point-in-time projection of one cluster's state.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ClusterSync {
    pub cluster: String,
    pub sync_status: SyncStatus,
    pub service_count: usize,
    pub last_seq: u64,
}

// === impl ConnectionRegistry ===

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_AFTER, DEFAULT_DISCONNECT_AFTER)
    }
}

impl ConnectionRegistry {
    pub fn new(stale_after: Duration, disconnect_after: Duration) -> Self {
        Self {
            clusters: Mutex::new(HashMap::default()),
            stale_after,
            disconnect_after,
        }
    }

    /// Registers a new edge connection, returning its per-connection token.
    ///
    /// A duplicate attachment for the same cluster replaces the prior state;
    /// the prior stream's token is cancelled so its tasks stop.
    pub fn attach(&self, cluster: &str) -> CancellationToken {
        let cancel = CancellationToken::new();
        let state = ConnectionState {
            connected_at: Instant::now(),
            last_update: None,
            service_count: 0,
            last_seq: 0,
            disconnected: false,
            cancel: cancel.clone(),
        };
        if let Some(prior) = self.clusters.lock().insert(cluster.to_string(), state) {
            tracing::info!(%cluster, "replacing prior edge connection");
            prior.cancel.cancel();
        }
        cancel
    }

    /// Records an inbound snapshot, promoting the connection to healthy.
    pub fn record_snapshot(&self, cluster: &str, seq: u64, service_count: usize) {
        if let Some(state) = self.clusters.lock().get_mut(cluster) {
            state.last_update = Some(Instant::now());
            state.service_count = service_count;
            state.last_seq = seq;
            state.disconnected = false;
        }
    }

    /// Marks the cluster disconnected, but only if `token` still identifies
    /// the current connection; a replaced stream's teardown is a no-op.
    pub fn detach(&self, cluster: &str, token: &CancellationToken) {
        if let Some(state) = self.clusters.lock().get_mut(cluster) {
            // A replaced stream's token was cancelled at attach time; only
            // the live stream may mark the cluster disconnected.
            if token.is_cancelled() && !state.cancel.is_cancelled() {
                return;
            }
            state.disconnected = true;
        }
    }

    pub fn status(&self, cluster: &str) -> Option<SyncStatus> {
        let clusters = self.clusters.lock();
        clusters.get(cluster).map(|s| self.derive_status(s))
    }

    /// All clusters with their read-time status, sorted by name.
    pub fn statuses(&self) -> Vec<ClusterSync> {
        let clusters = self.clusters.lock();
        let mut out: Vec<ClusterSync> = clusters
            .iter()
            .map(|(cluster, s)| ClusterSync {
                cluster: cluster.clone(),
                sync_status: self.derive_status(s),
                service_count: s.service_count,
                last_seq: s.last_seq,
            })
            .collect();
        out.sort_by(|a, b| a.cluster.cmp(&b.cluster));
        out
    }

    /// Status degradation happens at read time: a connection quiet past the
    /// stale threshold reads STALE, past the disconnect threshold (or after
    /// its stream ended) DISCONNECTED.
    fn derive_status(&self, state: &ConnectionState) -> SyncStatus {
        if state.disconnected {
            return SyncStatus::Disconnected;
        }
        let since = match state.last_update {
            None => return SyncStatus::Connecting,
            Some(at) => at.elapsed(),
        };
        if since >= self.disconnect_after {
            SyncStatus::Disconnected
        } else if since >= self.stale_after {
            SyncStatus::Stale
        } else {
            SyncStatus::Healthy
        }
    }
}
