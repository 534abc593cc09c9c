//! Rust types for the Istio configuration kinds the snapshot builder lists.
//!
//! Only the fields the snapshot projection consumes are modeled; everything
//! else in a spec round-trips through the flattened `extra` map so the raw
//! serialization of a listed object stays complete.

mod authorization_policy;
mod destination_rule;
mod envoy_filter;
mod gateway;
mod peer_authentication;
mod request_authentication;
mod selector;
mod service_entry;
mod sidecar;
mod virtual_service;
mod wasm_plugin;

pub use self::{
    authorization_policy::{AuthorizationPolicy, AuthorizationPolicySpec},
    destination_rule::{DestinationRule, DestinationRuleSpec, Subset},
    envoy_filter::{EnvoyFilter, EnvoyFilterSpec},
    gateway::{Gateway, GatewaySpec},
    peer_authentication::{PeerAuthentication, PeerAuthenticationSpec},
    request_authentication::{RequestAuthentication, RequestAuthenticationSpec},
    selector::{LabelSelector, PolicyTargetRef, WorkloadSelector},
    service_entry::{ServiceEntry, ServiceEntrySpec},
    sidecar::{Sidecar, SidecarSpec},
    virtual_service::{VirtualService, VirtualServiceSpec},
    wasm_plugin::{WasmPlugin, WasmPluginSpec},
};
