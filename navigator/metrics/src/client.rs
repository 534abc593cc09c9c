use crate::auth::{self, AuthSpec, TokenCache};
use serde::Deserialize;
use std::{collections::HashMap, sync::Arc, time::Duration};

/// An instant-query client for a PromQL-compatible endpoint.
pub struct PrometheusClient {
    http: reqwest::Client,
    endpoint: String,
    auth: Option<ClientAuth>,
}

struct ClientAuth {
    cache: Arc<TokenCache>,
    edge_id: String,
    spec: AuthSpec,
}

/// One element of an instant-query vector.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub labels: HashMap<String, String>,
    pub value: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("query transport failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint rejected the query: {0}")]
    Rejected(String),

    #[error("expected a vector result, got {0:?}")]
    UnexpectedResultType(String),

    #[error("malformed query response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Token(#[from] auth::Error),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<Payload>,
}

#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(rename = "resultType")]
    result_type: String,
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    metric: HashMap<String, String>,
    /// `[unix timestamp, value string]`
    value: (f64, String),
}

// === impl PrometheusClient ===

impl PrometheusClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let mut endpoint = endpoint.into();
        while endpoint.ends_with('/') {
            endpoint.pop();
        }
        Ok(Self {
            http,
            endpoint,
            auth: None,
        })
    }

    /// Authenticates every query with a token acquired through the shared
    /// cache.
    pub fn with_auth(
        mut self,
        cache: Arc<TokenCache>,
        edge_id: impl Into<String>,
        spec: AuthSpec,
    ) -> Self {
        self.auth = Some(ClientAuth {
            cache,
            edge_id: edge_id.into(),
            spec,
        });
        self
    }

    /// Issues one instant query, returning the vector samples.
    pub async fn query(&self, promql: &str) -> Result<Vec<Sample>, QueryError> {
        let mut request = self
            .http
            .post(format!("{}/api/v1/query", self.endpoint))
            .form(&[("query", promql)]);

        if let Some(auth) = &self.auth {
            let token = auth.cache.acquire(&auth.edge_id, &auth.spec).await?;
            request = request.bearer_auth(token);
        }

        let envelope: Envelope = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        decode(envelope)
    }
}

/// Unwraps an instant-query envelope into its vector samples. Non-numeric
/// sample values are dropped.
fn decode(envelope: Envelope) -> Result<Vec<Sample>, QueryError> {
    if envelope.status != "success" {
        return Err(QueryError::Rejected(
            envelope.error.unwrap_or(envelope.status),
        ));
    }
    let Some(payload) = envelope.data else {
        return Err(QueryError::Rejected("response carried no data".to_string()));
    };
    if payload.result_type != "vector" {
        return Err(QueryError::UnexpectedResultType(payload.result_type));
    }

    let samples: Vec<VectorSample> = serde_json::from_value(payload.result)?;
    Ok(samples
        .into_iter()
        .filter_map(|s| {
            let value = s.value.1.parse::<f64>().ok()?;
            value.is_finite().then_some(Sample {
                labels: s.metric,
                value,
            })
        })
        .collect())
}
