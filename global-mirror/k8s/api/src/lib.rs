#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! The slice of the Kubernetes API surface touched by the global mirror.

pub mod labels;

pub use k8s_openapi::api::{
    core::v1::{Namespace, Service, ServicePort, ServiceSpec},
    discovery::v1::{Endpoint, EndpointSlice},
};
pub use kube::{
    api::{Api, DeleteParams, ListParams, ObjectMeta, PostParams, ResourceExt},
    Client, Error,
};

/// Returns true if the error is the API server reporting that the resource
/// does not exist.
pub fn is_not_found(error: &Error) -> bool {
    matches!(error, Error::Api(response) if response.code == 404)
}

/// Returns true if the error is the API server rejecting a create because
/// the resource is already present.
pub fn is_already_exists(error: &Error) -> bool {
    matches!(error, Error::Api(response) if response.reason == "AlreadyExists")
}
