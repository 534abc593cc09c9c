use crate::{
    control_plane::discover_control_plane,
    convert::{convert_mesh, convert_services, JoinMaps, MeshLists},
};
use anyhow::{anyhow, Result};
use kube::api::ListParams;
use navigator_core::ClusterSnapshot;
use navigator_k8s_api::{self as k8s, istio};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Listings issued per cycle: services, endpoint slices, pods, namespaces,
/// istiod deployments, and the ten mesh kinds.
const LISTINGS: usize = 15;

/// Produces a [`ClusterSnapshot`] per cycle by fanning out every cluster-wide
/// listing concurrently.
#[derive(Clone)]
pub struct SnapshotBuilder {
    client: kube::Client,
    cluster: String,
}

// === impl SnapshotBuilder ===

impl SnapshotBuilder {
    pub fn new(client: kube::Client, cluster: impl Into<String>) -> Self {
        Self {
            client,
            cluster: cluster.into(),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Runs one snapshot cycle.
    ///
    /// Network-layer listing failures compose into a single error and fail
    /// the cycle; object-level conversion failures are logged and skipped so
    /// the snapshot stays partial but valid.
    pub async fn build(&self, cancel: &CancellationToken) -> Result<ClusterSnapshot> {
        let (errs_tx, mut errs_rx) = mpsc::channel::<anyhow::Error>(LISTINGS);

        let istiod = ListParams::default().labels("app=istiod");
        let services = self.spawn_list::<k8s::Service>("services", None, cancel, &errs_tx);
        let slices = self.spawn_list::<k8s::EndpointSlice>("endpointslices", None, cancel, &errs_tx);
        let pods = self.spawn_list::<k8s::Pod>("pods", None, cancel, &errs_tx);
        let namespaces = self.spawn_list::<k8s::Namespace>("namespaces", None, cancel, &errs_tx);
        let deployments =
            self.spawn_list::<k8s::Deployment>("istiod deployments", Some(istiod), cancel, &errs_tx);

        let drs =
            self.spawn_list::<istio::DestinationRule>("destinationrules", None, cancel, &errs_tx);
        let vss =
            self.spawn_list::<istio::VirtualService>("virtualservices", None, cancel, &errs_tx);
        let gws = self.spawn_list::<istio::Gateway>("gateways", None, cancel, &errs_tx);
        let scs = self.spawn_list::<istio::Sidecar>("sidecars", None, cancel, &errs_tx);
        let ses = self.spawn_list::<istio::ServiceEntry>("serviceentries", None, cancel, &errs_tx);
        let efs = self.spawn_list::<istio::EnvoyFilter>("envoyfilters", None, cancel, &errs_tx);
        let pas = self
            .spawn_list::<istio::PeerAuthentication>("peerauthentications", None, cancel, &errs_tx);
        let ras = self.spawn_list::<istio::RequestAuthentication>(
            "requestauthentications",
            None,
            cancel,
            &errs_tx,
        );
        let aps = self.spawn_list::<istio::AuthorizationPolicy>(
            "authorizationpolicies",
            None,
            cancel,
            &errs_tx,
        );
        let wps = self.spawn_list::<istio::WasmPlugin>("wasmplugins", None, cancel, &errs_tx);

        let (
            services,
            slices,
            pods,
            namespaces,
            deployments,
            destination_rules,
            virtual_services,
            gateways,
            sidecars,
            service_entries,
            envoy_filters,
            peer_authentications,
            request_authentications,
            authorization_policies,
            wasm_plugins,
        ) = tokio::join!(
            services,
            slices,
            pods,
            namespaces,
            deployments,
            drs,
            vss,
            gws,
            scs,
            ses,
            efs,
            pas,
            ras,
            aps,
            wps
        );

        drop(errs_tx);
        let mut errors = Vec::new();
        while let Ok(e) = errs_rx.try_recv() {
            errors.push(e);
        }
        if !errors.is_empty() {
            let merged = errors
                .iter()
                .map(|e| format!("{e:#}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(anyhow!(
                "{} of {LISTINGS} cluster listings failed: {merged}",
                errors.len()
            ));
        }

        let control_plane = discover_control_plane(
            deployments.iter().flatten(),
            namespaces
                .into_iter()
                .flatten()
                .filter_map(|ns| ns.metadata.name),
        );

        let joins = JoinMaps::new(slices.unwrap_or_default(), pods.unwrap_or_default());

        let mut snapshot = ClusterSnapshot::new(&self.cluster);
        snapshot.control_plane = control_plane;
        snapshot.services = convert_services(services.unwrap_or_default(), &joins);
        snapshot.mesh = convert_mesh(MeshLists {
            destination_rules: destination_rules.unwrap_or_default(),
            virtual_services: virtual_services.unwrap_or_default(),
            gateways: gateways.unwrap_or_default(),
            sidecars: sidecars.unwrap_or_default(),
            service_entries: service_entries.unwrap_or_default(),
            envoy_filters: envoy_filters.unwrap_or_default(),
            peer_authentications: peer_authentications.unwrap_or_default(),
            request_authentications: request_authentications.unwrap_or_default(),
            authorization_policies: authorization_policies.unwrap_or_default(),
            wasm_plugins: wasm_plugins.unwrap_or_default(),
        });

        tracing::debug!(
            cluster = %snapshot.cluster,
            services = snapshot.services.len(),
            mesh_objects = snapshot.mesh.object_count(),
            root_namespace = %snapshot.control_plane.root_namespace,
            "assembled cluster snapshot"
        );
        Ok(snapshot)
    }

    /// Spawns one cluster-wide listing; a failure (or cancellation) lands in
    /// the cycle's error channel and yields an empty result.
    fn spawn_list<T>(
        &self,
        what: &'static str,
        params: Option<ListParams>,
        cancel: &CancellationToken,
        errs: &mpsc::Sender<anyhow::Error>,
    ) -> tokio::task::JoinHandle<Vec<T>>
    where
        T: kube::Resource<DynamicType = ()>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug
            + Send
            + 'static,
    {
        let api = kube::Api::<T>::all(self.client.clone());
        let params = params.unwrap_or_default();
        let cancel = cancel.clone();
        let errs = errs.clone();
        tokio::spawn(
            async move {
                if cancel.is_cancelled() {
                    let _ = errs.try_send(anyhow!("{what} listing cancelled"));
                    return Vec::new();
                }
                let res = tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = errs.try_send(anyhow!("{what} listing cancelled"));
                        return Vec::new();
                    }
                    res = api.list(&params) => res,
                };
                match res {
                    Ok(list) => {
                        tracing::trace!(count = list.items.len(), "listed {what}");
                        list.items
                    }
                    Err(error) => {
                        let _ = errs
                            .try_send(anyhow::Error::new(error).context(format!("listing {what}")));
                        Vec::new()
                    }
                }
            }
            .instrument(tracing::info_span!("list", what)),
        )
    }
}
