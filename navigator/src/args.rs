use anyhow::{bail, Result};
use clap::Parser;
use navigator_core::transport::{duplex, EdgeConnection, ManagerTransport};
use navigator_edge::Edge;
use navigator_k8s_snapshot::SnapshotBuilder;
use navigator_manager::{api, Aggregator, Api, ConnectionRegistry, Manager};
use navigator_metrics::{
    auth::{AuthSpec, ExecSpec, TokenCache},
    MetricsEngine, PrometheusClient,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};

/// Snapshots queued towards the manager before the edge producer blocks.
const SNAPSHOT_QUEUE: usize = 8;

const PROMETHEUS_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[clap(name = "navigator", about = "A multi-cluster service-mesh observability aggregator")]
pub struct Args {
    #[clap(long, default_value = "navigator=info,warn", env = "NAVIGATOR_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Address of the frontend query API.
    #[clap(long, default_value = "0.0.0.0:8080")]
    api_addr: SocketAddr,

    /// The cluster identifier stamped onto every snapshot.
    #[clap(long, default_value = "Kubernetes")]
    cluster_name: String,

    /// Seconds between snapshot cycles.
    #[clap(long, default_value = "15")]
    sync_interval: u64,

    /// Base URL of a PromQL-compatible endpoint; omitting it disables
    /// traffic metrics.
    #[clap(long)]
    prometheus_url: Option<String>,

    /// Static bearer token for the metrics endpoint.
    #[clap(long, env = "NAVIGATOR_PROMETHEUS_TOKEN")]
    prometheus_token: Option<String>,

    /// Command (with arguments) printing a bearer token on stdout.
    #[clap(long, conflicts_with = "prometheus_token")]
    prometheus_token_command: Option<String>,

    /// Deadline for the token command, e.g. "30s".
    #[clap(long)]
    prometheus_token_timeout: Option<String>,
}

/// Hands an edge a direct in-process stream to the manager. A remote wire
/// adapter dials the same contract over its own transport.
struct LocalTransport {
    manager: Arc<Manager>,
}

#[async_trait::async_trait]
impl ManagerTransport for LocalTransport {
    async fn connect(&self, cluster: &str) -> Result<EdgeConnection> {
        let (edge, conn) = duplex(cluster, SNAPSHOT_QUEUE);
        self.manager.attach(conn);
        Ok(edge)
    }
}

// === impl Args ===

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            api_addr,
            cluster_name,
            sync_interval,
            prometheus_url,
            prometheus_token,
            prometheus_token_command,
            prometheus_token_timeout,
        } = self;

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin)
            .with_client(client)
            .build()
            .await?;

        let sync_interval = Duration::from_secs(sync_interval.max(1));
        let shutdown = CancellationToken::new();

        // The process-wide token cache and its expiry sweeper.
        let tokens = Arc::new(TokenCache::default());
        tokio::spawn({
            let tokens = tokens.clone();
            let shutdown = shutdown.clone();
            async move { tokens.run_sweeper(shutdown).await }.instrument(info_span!("token_sweeper"))
        });

        let registry = ConnectionRegistry::new(sync_interval * 2, sync_interval * 4);
        let manager = Arc::new(Manager::new(
            Arc::new(registry),
            Arc::new(Aggregator::default()),
        ));

        let builder = SnapshotBuilder::new(runtime.client(), &cluster_name);
        let transport = Arc::new(LocalTransport {
            manager: manager.clone(),
        });
        let mut edge = Edge::new(builder, transport, sync_interval);

        if let Some(url) = prometheus_url {
            let mut prometheus = PrometheusClient::new(url, PROMETHEUS_TIMEOUT)?;
            if let Some(auth) = auth_spec(
                prometheus_token,
                prometheus_token_command,
                prometheus_token_timeout,
            )? {
                prometheus = prometheus.with_auth(tokens.clone(), &cluster_name, auth);
            }
            edge = edge.with_metrics(Arc::new(MetricsEngine::new(prometheus, &cluster_name)));
        }

        tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                if let Err(error) = edge.run(shutdown).await {
                    tracing::error!(%error, "edge loop failed");
                }
            }
            .instrument(info_span!("edge", cluster = %cluster_name))
        });

        tokio::spawn(
            api::serve(api_addr, Api::new(manager), runtime.shutdown_handle())
                .instrument(info_span!("api")),
        );

        // Relay the runtime's drain signal to the cancellation-token world.
        tokio::spawn({
            let drain = runtime.shutdown_handle();
            let shutdown = shutdown.clone();
            async move {
                let release = drain.signaled().await;
                shutdown.cancel();
                drop(release);
            }
        });

        // Block on the shutdown signal; background tasks wind down with it.
        if runtime.run().await.is_err() {
            bail!("aborted");
        }
        Ok(())
    }
}

/// Builds the metrics auth spec from the flags, if any.
fn auth_spec(
    token: Option<String>,
    command: Option<String>,
    timeout: Option<String>,
) -> Result<Option<AuthSpec>> {
    if let Some(token) = token {
        return Ok(Some(AuthSpec::Static { token }));
    }
    let Some(command) = command else {
        return Ok(None);
    };
    let mut words = command.split_whitespace().map(str::to_string);
    let Some(program) = words.next() else {
        bail!("--prometheus-token-command must not be empty");
    };
    Ok(Some(AuthSpec::Exec(ExecSpec {
        command: program,
        args: words.collect(),
        env: Default::default(),
        timeout,
    })))
}
