use crate::filter;
use ahash::AHashMap as HashMap;
use linkerd_global_mirror_k8s_api::{labels, EndpointSlice, ResourceExt, Service, ServicePort};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::{sync::mpsc::UnboundedSender, time};

pub type SharedIndex = Arc<RwLock<Index>>;

/// Identifies a watched resource by namespace and name.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
}

/// Work for the service reconciler.
#[derive(Clone, Debug, PartialEq)]
pub enum ServiceUpdate {
    /// A target service was observed for the first time; its global
    /// counterpart must exist and cover its ports.
    Added(Service),

    /// A target service's port list changed.
    PortsChanged(Service),

    /// A target service was deleted.
    Deleted { name: String, cluster_name: String },
}

/// Work for the EndpointSlice reconciler.
#[derive(Clone, Debug, PartialEq)]
pub enum SliceUpdate {
    /// A target slice was observed for the first time; its global
    /// counterpart must exist.
    Added(EndpointSlice),

    /// A target slice's endpoint list changed; the global counterpart must
    /// be rewritten to replicate it.
    EndpointsChanged(EndpointSlice),

    /// A target slice was deleted.
    Deleted {
        name: String,
        service_name: String,
        cluster_name: String,
    },
}

/// Routes mirrored-resource events to the reconcilers.
///
/// The index keeps the last observed copy of every accepted resource so
/// that spurious redeliveries can be dropped, deletions can be resolved
/// back to the labels they were accepted with, and the periodic resync can
/// replay current state through the reconcilers.
pub struct Index {
    services: HashMap<ResourceId, Service>,
    slices: HashMap<ResourceId, EndpointSlice>,
    service_tx: UnboundedSender<ServiceUpdate>,
    slice_tx: UnboundedSender<SliceUpdate>,
}

// === impl Index ===

impl Index {
    pub fn shared(
        service_tx: UnboundedSender<ServiceUpdate>,
        slice_tx: UnboundedSender<SliceUpdate>,
    ) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            services: HashMap::new(),
            slices: HashMap::new(),
            service_tx,
            slice_tx,
        }))
    }

    /// Periodically replays every tracked resource through the add path.
    ///
    /// Creation and port growth are idempotent, so the replay re-converges
    /// global state that a dropped write left behind.
    pub async fn run(index: SharedIndex, period: time::Duration) {
        let mut interval = time::interval(period);
        // The first tick fires immediately; the watches are still replaying
        // current state at that point, so skip it.
        interval.tick().await;
        loop {
            interval.tick().await;
            index.read().resync();
        }
    }

    pub(crate) fn resync(&self) {
        tracing::debug!(
            services = self.services.len(),
            slices = self.slices.len(),
            "Replaying tracked resources"
        );
        for service in self.services.values() {
            self.send_service(ServiceUpdate::Added(service.clone()));
        }
        for slice in self.slices.values() {
            self.send_slice(SliceUpdate::Added(slice.clone()));
        }
    }

    fn send_service(&self, update: ServiceUpdate) {
        if let Err(error) = self.service_tx.send(update) {
            tracing::error!(%error, "Failed to send service update");
        }
    }

    fn send_slice(&self, update: SliceUpdate) {
        if let Err(error) = self.slice_tx.send(update) {
            tracing::error!(%error, "Failed to send EndpointSlice update");
        }
    }
}

impl kubert::index::IndexNamespacedResource<Service> for Index {
    fn apply(&mut self, service: Service) {
        let namespace = service.namespace().expect("service must have a namespace");
        let name = service.name_unchecked();
        let id = ResourceId { namespace, name };

        // Watches redeliver unchanged objects; drop anything already seen
        // at this resource version.
        if let Some(seen) = self.services.get(&id) {
            if seen.resource_version() == service.resource_version() {
                return;
            }
        }

        if !filter::accepts(service.labels()) {
            return;
        }

        match self.services.insert(id, service.clone()) {
            None => self.send_service(ServiceUpdate::Added(service)),
            Some(old) => {
                if service_ports(&old) != service_ports(&service) {
                    self.send_service(ServiceUpdate::PortsChanged(service));
                }
            }
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        let id = ResourceId { namespace, name };
        if let Some(service) = self.services.remove(&id) {
            let cluster_name = service
                .labels()
                .get(labels::CLUSTER_NAME)
                .cloned()
                .unwrap_or_default();
            self.send_service(ServiceUpdate::Deleted {
                name: id.name,
                cluster_name,
            });
        }
    }

    // Resets are applied object-by-object by the default implementation;
    // the per-object paths above already handle replayed state.
}

impl kubert::index::IndexNamespacedResource<EndpointSlice> for Index {
    fn apply(&mut self, slice: EndpointSlice) {
        let namespace = slice.namespace().expect("slice must have a namespace");
        let name = slice.name_unchecked();
        let id = ResourceId { namespace, name };

        if let Some(seen) = self.slices.get(&id) {
            if seen.resource_version() == slice.resource_version() {
                return;
            }
        }

        if !filter::accepts(slice.labels()) {
            return;
        }

        // Both the global slice's name and its service linkage derive from
        // these labels; a slice missing either cannot be aggregated.
        if !slice.labels().contains_key(labels::SERVICE_NAME)
            || !slice.labels().contains_key(labels::CLUSTER_NAME)
        {
            tracing::warn!(
                slice = %id.name,
                namespace = %id.namespace,
                "Mirrored EndpointSlice is missing its service or cluster label"
            );
            return;
        }

        match self.slices.insert(id, slice.clone()) {
            None => self.send_slice(SliceUpdate::Added(slice)),
            Some(old) => {
                if old.endpoints != slice.endpoints {
                    self.send_slice(SliceUpdate::EndpointsChanged(slice));
                }
            }
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        let id = ResourceId { namespace, name };
        if let Some(slice) = self.slices.remove(&id) {
            let service_name = slice
                .labels()
                .get(labels::SERVICE_NAME)
                .cloned()
                .unwrap_or_default();
            let cluster_name = slice
                .labels()
                .get(labels::CLUSTER_NAME)
                .cloned()
                .unwrap_or_default();
            self.send_slice(SliceUpdate::Deleted {
                name: id.name,
                service_name,
                cluster_name,
            });
        }
    }
}

pub(crate) fn service_ports(service: &Service) -> &[ServicePort] {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_deref())
        .unwrap_or_default()
}
