#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Builds a [`ClusterSnapshot`] from a live cluster: parallel cluster-wide
//! listings, service/endpoint/pod joins, proxy-mode classification,
//! control-plane discovery, and mesh-object conversion.

mod builder;
mod control_plane;
mod convert;
mod proxy;


pub use self::{
    builder::SnapshotBuilder,
    control_plane::discover_control_plane,
    convert::{convert_mesh, convert_services, JoinMaps, MeshLists},
    proxy::{classify_pod, is_envoy_container},
};
