#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Mesh traffic metrics: PromQL templating and fan-out against a Prometheus
//! compatible endpoint, pair-keyed merging, histogram assembly, and the
//! token cache fronting exec-based credential commands.

pub mod auth;
mod client;
mod engine;
mod pairs;
mod query;

pub use self::{
    client::{PrometheusClient, QueryError, Sample},
    engine::{MetricsEngine, ServiceTarget},
    pairs::{build_distributions, downstream_pair, merge_signals, pair_id_from_labels},
    query::{build_queries, filter_clause, range_literal, QueryKind},
};
