use crate::server::{DispatchError, Manager};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future;
use http::{Method, StatusCode};
use hyper::{Request, Response};
use navigator_core::transport::ConnectionQuery;
use navigator_core::{AggregatedInstance, AggregatedService, ServicePairMetrics, TimeWindow};
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, info};

type Body = http_body_util::Full<Bytes>;

const SERVICES_PREFIX: &str = "/api/v1alpha1/services";

/// The default window for connection queries when the caller gives no range.
const DEFAULT_WINDOW_SECS: i64 = 300;

/// The read-only query surface over the aggregated view.
#[derive(Clone)]
pub struct Api {
    manager: Arc<Manager>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, serde::Serialize)]
struct ServiceList<'a> {
    services: Vec<&'a AggregatedService>,
    clusters: Vec<crate::registry::ClusterSync>,
}

#[derive(Debug, serde::Serialize)]
struct Connections {
    cluster: String,
    pairs: Vec<ServicePairMetrics>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

// === impl Api ===

impl Api {
    pub fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }

    async fn handle(
        &self,
        method: &Method,
        path: &str,
        query: Option<&str>,
    ) -> Result<Response<Body>, Error> {
        if method != Method::GET {
            return error_response(StatusCode::METHOD_NOT_ALLOWED, "only GET is supported");
        }
        let Some(rest) = path.strip_prefix(SERVICES_PREFIX) else {
            return error_response(StatusCode::NOT_FOUND, "unknown resource");
        };
        if !rest.is_empty() && !rest.starts_with('/') {
            return error_response(StatusCode::NOT_FOUND, "unknown resource");
        }

        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [] => self.list_services(query),
            [id] => self.get_service(id),
            [sid, "instances", iid] => self.get_instance(sid, iid),
            [sid, "connections"] => self.get_connections(sid, query).await,
            _ => error_response(StatusCode::NOT_FOUND, "unknown resource"),
        }
    }

    fn list_services(&self, query: Option<&str>) -> Result<Response<Body>, Error> {
        let namespace = query_param(query, "namespace");
        let view = self.manager.aggregator().view();
        json_response(
            StatusCode::OK,
            &ServiceList {
                services: view.services_in(namespace.as_deref()),
                clusters: self.manager.registry().statuses(),
            },
        )
    }

    fn get_service(&self, id: &str) -> Result<Response<Body>, Error> {
        if parse_service_id(id).is_none() {
            return error_response(
                StatusCode::BAD_REQUEST,
                "service id must be namespace:service-name",
            );
        }
        let view = self.manager.aggregator().view();
        match view.service(id) {
            Some(service) => json_response(StatusCode::OK, service),
            None => error_response(StatusCode::NOT_FOUND, &format!("no service {id}")),
        }
    }

    fn get_instance(&self, sid: &str, iid: &str) -> Result<Response<Body>, Error> {
        if parse_service_id(sid).is_none() {
            return error_response(
                StatusCode::BAD_REQUEST,
                "service id must be namespace:service-name",
            );
        }
        if parse_instance_id(iid).is_none() {
            return error_response(
                StatusCode::BAD_REQUEST,
                "instance id must be cluster:namespace:pod",
            );
        }
        let view = self.manager.aggregator().view();
        if view.service(sid).is_none() {
            return error_response(StatusCode::NOT_FOUND, &format!("no service {sid}"));
        }
        match view.instance(sid, iid) {
            Some(instance) => json_response::<AggregatedInstance>(StatusCode::OK, instance),
            None => error_response(StatusCode::NOT_FOUND, &format!("no instance {iid}")),
        }
    }

    async fn get_connections(
        &self,
        sid: &str,
        query: Option<&str>,
    ) -> Result<Response<Body>, Error> {
        let view = self.manager.aggregator().view();
        let Some(service) = view.service(sid) else {
            return error_response(StatusCode::NOT_FOUND, &format!("no service {sid}"));
        };

        let window = match parse_window(query) {
            Ok(window) => window,
            Err(message) => return error_response(StatusCode::BAD_REQUEST, &message),
        };

        // The query runs on an edge owning this service; the first cluster
        // with a live stream takes it.
        let Some(cluster) = service
            .clusters
            .iter()
            .find(|c| self.manager.has_edge(c))
            .cloned()
        else {
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                &format!("no connected edge serves {sid}"),
            );
        };

        let connection_query = ConnectionQuery {
            service: service.name.clone(),
            namespace: service.namespace.clone(),
            proxy_mode: service.proxy_mode,
            window,
        };
        drop(view);

        match self
            .manager
            .query_connections(&cluster, connection_query)
            .await
        {
            Ok(pairs) => json_response(StatusCode::OK, &Connections { cluster, pairs }),
            Err(DispatchError::Timeout) => {
                error_response(StatusCode::GATEWAY_TIMEOUT, "metric query timed out")
            }
            Err(error) => error_response(StatusCode::BAD_GATEWAY, &format!("{error}")),
        }
    }
}

impl tower::Service<Request<hyper::body::Incoming>> for Api {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        let api = self.clone();
        Box::pin(async move {
            let method = req.method().clone();
            let path = req.uri().path().to_string();
            let query = req.uri().query().map(str::to_string);
            api.handle(&method, &path, query.as_deref()).await
        })
    }
}

/// `namespace:service-name`
fn parse_service_id(id: &str) -> Option<(&str, &str)> {
    match id.split_once(':') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains(':') => {
            Some((ns, name))
        }
        _ => None,
    }
}

/// `cluster:namespace:pod`
fn parse_instance_id(id: &str) -> Option<(&str, &str, &str)> {
    let mut parts = id.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(cluster), Some(ns), Some(pod))
            if !cluster.is_empty() && !ns.is_empty() && !pod.is_empty() =>
        {
            Some((cluster, ns, pod))
        }
        _ => None,
    }
}

fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.to_string())
}

/// Reads `start`/`end` (unix seconds or RFC 3339); both absent means the
/// default trailing window.
fn parse_window(query: Option<&str>) -> Result<TimeWindow, String> {
    let start = query_param(query, "start");
    let end = query_param(query, "end");
    match (start, end) {
        (None, None) => Ok(TimeWindow::last_seconds(DEFAULT_WINDOW_SECS)),
        (Some(start), Some(end)) => {
            let start = parse_time(&start)?;
            let end = parse_time(&end)?;
            if end <= start {
                return Err("end must be after start".to_string());
            }
            Ok(TimeWindow::new(start, end))
        }
        _ => Err("start and end must be given together".to_string()),
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(secs) = value.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| format!("timestamp {value} out of range"));
    }
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid time {value:?}: {e}"))
}

fn json_response<T: serde::Serialize + ?Sized>(
    status: StatusCode,
    body: &T,
) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(body)?;
    Ok(Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::new(bytes.into()))
        .expect("json response must be valid"))
}

fn error_response(status: StatusCode, message: &str) -> Result<Response<Body>, Error> {
    json_response(status, &ErrorBody { error: message })
}

/// Serves the API until shutdown is signaled.
pub async fn serve(addr: SocketAddr, api: Api, drain: drain::Watch) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "frontend API listening");
    loop {
        tokio::select! {
            res = listener.accept() => {
                let (stream, _peer) = res?;
                let io = hyper_util::rt::TokioIo::new(stream);
                let svc = hyper_util::service::TowerToHyperService::new(api.clone());
                let drain = drain.clone();
                tokio::spawn(async move {
                    let builder = hyper_util::server::conn::auto::Builder::new(
                        hyper_util::rt::TokioExecutor::new(),
                    );
                    let conn = builder.serve_connection(io, svc);
                    tokio::pin!(conn);
                    tokio::select! {
                        res = conn.as_mut() => {
                            if let Err(error) = res {
                                debug!(%error, "connection error");
                            }
                        }
                        _ = drain.signaled() => {
                            conn.as_mut().graceful_shutdown();
                            let _ = conn.await;
                        }
                    }
                });
            }
            _ = drain.clone().signaled() => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Aggregator;
    use crate::registry::ConnectionRegistry;
    use http_body_util::BodyExt;
    use navigator_core::transport::{duplex, EdgeMessage, ManagerMessage};
    use navigator_core::{ClusterSnapshot, PairId, Service, ServiceInstance};

    fn seeded_api() -> (Api, Arc<Manager>) {
        let manager = Arc::new(Manager::new(
            Arc::new(ConnectionRegistry::default()),
            Arc::new(Aggregator::default()),
        ));

        let mut snapshot = ClusterSnapshot::new("east");
        snapshot.services.push(Service {
            name: "backend".to_string(),
            namespace: "shop".to_string(),
            service_type: "ClusterIP".to_string(),
            instances: vec![ServiceInstance {
                ip: "10.0.0.1".to_string(),
                pod_name: "backend-0".to_string(),
                namespace: "shop".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        });
        snapshot.services.push(Service {
            name: "prometheus".to_string(),
            namespace: "infra".to_string(),
            ..Default::default()
        });
        manager.aggregator().apply(snapshot);

        (Api::new(manager.clone()), manager)
    }

    async fn get(api: &Api, path: &str, query: Option<&str>) -> (StatusCode, serde_json::Value) {
        let rsp = api.handle(&Method::GET, path, query).await.unwrap();
        let status = rsp.status();
        let bytes = rsp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn listing_returns_services_and_cluster_status() {
        let (api, manager) = seeded_api();
        manager.registry().attach("east");
        manager.registry().record_snapshot("east", 1, 2);

        let (status, body) = get(&api, "/api/v1alpha1/services", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["services"].as_array().unwrap().len(), 2);
        assert_eq!(body["clusters"][0]["cluster"], "east");
        assert_eq!(body["clusters"][0]["sync_status"], "healthy");
    }

    #[tokio::test]
    async fn listing_filters_by_namespace() {
        let (api, _) = seeded_api();
        let (status, body) = get(&api, "/api/v1alpha1/services", Some("namespace=shop")).await;
        assert_eq!(status, StatusCode::OK);
        let services = body["services"].as_array().unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0]["id"], "shop:backend");
    }

    #[tokio::test]
    async fn service_lookup_by_id() {
        let (api, _) = seeded_api();
        let (status, body) = get(&api, "/api/v1alpha1/services/shop:backend", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "backend");

        let (status, _) = get(&api, "/api/v1alpha1/services/shop:missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = get(&api, "/api/v1alpha1/services/not-an-id", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn instance_lookup_by_id() {
        let (api, _) = seeded_api();
        let (status, body) = get(
            &api,
            "/api/v1alpha1/services/shop:backend/instances/east:shop:backend-0",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cluster"], "east");
        assert_eq!(body["instance"]["pod_name"], "backend-0");

        let (status, _) = get(
            &api,
            "/api/v1alpha1/services/shop:backend/instances/west:shop:backend-0",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn connections_dispatch_to_the_owning_edge() {
        let (api, manager) = seeded_api();
        let (mut edge, conn) = duplex("east", 8);
        manager.attach(conn);

        tokio::spawn(async move {
            match edge.rx.recv().await.unwrap() {
                ManagerMessage::QueryMetrics { request_id, query } => {
                    assert_eq!(query.service, "backend");
                    assert_eq!(query.namespace, "shop");
                    edge.tx
                        .send(EdgeMessage::Metrics {
                            request_id,
                            result: Ok(vec![ServicePairMetrics {
                                pair: PairId {
                                    src_cluster: "east".into(),
                                    src_namespace: "shop".into(),
                                    src_service: "frontend".into(),
                                    dst_cluster: "east".into(),
                                    dst_namespace: "shop".into(),
                                    dst_service: "backend".into(),
                                },
                                request_rate: 15.0,
                                ..Default::default()
                            }]),
                        })
                        .await
                        .unwrap();
                }
            }
        });

        let (status, body) = get(
            &api,
            "/api/v1alpha1/services/shop:backend/connections",
            Some("start=1767225300&end=1767225600"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cluster"], "east");
        assert_eq!(body["pairs"][0]["request_rate"], 15.0);
    }

    #[tokio::test]
    async fn connections_without_an_edge_are_unavailable() {
        let (api, _) = seeded_api();
        let (status, _) = get(
            &api,
            "/api/v1alpha1/services/shop:backend/connections",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn malformed_time_ranges_are_rejected() {
        let (api, manager) = seeded_api();
        let (_edge, conn) = duplex("east", 8);
        manager.attach(conn);

        let (status, _) = get(
            &api,
            "/api/v1alpha1/services/shop:backend/connections",
            Some("start=later"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get(
            &api,
            "/api/v1alpha1/services/shop:backend/connections",
            Some("start=20&end=10"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let (api, _) = seeded_api();
        let (status, _) = get(&api, "/api/v1alpha1/meshes", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = get(&api, "/api/v1alpha1/services/a:b/unknown", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
