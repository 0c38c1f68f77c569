#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Keeps global mirror resources converged with the per-cluster Services
//! and EndpointSlices written by the multicluster service mirror.
//!
//! The [`Index`] consumes both watch streams, filters out resources the
//! mirror does not own outright, and forwards typed updates to the two
//! reconcilers. Each reconciler owns a Kubernetes client and performs a
//! fresh read-modify-write against the API server for every update; the
//! API server, not a local cache, is the arbiter of the global resources'
//! current state.

mod endpoint_slice;
pub mod filter;
mod index;
pub mod naming;
pub mod ports;
mod service;

#[cfg(test)]
mod tests;

pub use self::{
    endpoint_slice::EndpointSliceReconciler,
    index::{Index, ResourceId, ServiceUpdate, SharedIndex, SliceUpdate},
    service::ServiceReconciler,
};
