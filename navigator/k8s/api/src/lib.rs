#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod istio;

pub use k8s_openapi::{
    api::{
        self,
        apps::v1::Deployment,
        core::v1::{
            Container, ContainerStatus, Namespace, Pod, PodSpec, PodStatus, Service, ServiceSpec,
            ServiceStatus,
        },
        discovery::v1::{Endpoint, EndpointSlice},
    },
    apimachinery::{self, pkg::apis::meta::v1::Time},
    NamespaceResourceScope,
};
pub use kube::{
    api::{Api, ListParams, ObjectMeta, Resource, ResourceExt},
    error::ErrorResponse,
    Client, Error,
};
