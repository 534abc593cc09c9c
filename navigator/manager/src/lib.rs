#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! The manager: accepts edge snapshot streams, tracks per-cluster sync
//! health, aggregates cluster state into a global service view, and serves
//! the frontend query API.

pub mod aggregator;
pub mod api;
pub mod registry;
pub mod server;

pub use self::{
    aggregator::{Aggregator, GlobalView},
    api::Api,
    registry::{ClusterSync, ConnectionRegistry},
    server::{DispatchError, Manager},
};
