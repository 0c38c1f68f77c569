use crate::{index::SliceUpdate, naming};
use anyhow::{Context, Result};
use linkerd_global_mirror_k8s_api::{
    self as k8s, labels, Api, DeleteParams, Endpoint, EndpointSlice, ListParams, ObjectMeta,
    PostParams, ResourceExt, Service,
};
use tokio::sync::mpsc::UnboundedReceiver;

/// Maintains global EndpointSlices in response to target slice events.
///
/// A global slice is a per-cluster replica of its target: endpoints are
/// copied wholesale on every change, with each hostname rewritten to
/// `<hostname>-<cluster>` so A records stay distinguishable inside the
/// shared global pool.
pub struct EndpointSliceReconciler {
    client: k8s::Client,
    namespace: String,
    updates: UnboundedReceiver<SliceUpdate>,
}

// === impl EndpointSliceReconciler ===

impl EndpointSliceReconciler {
    pub fn new(
        client: k8s::Client,
        namespace: String,
        updates: UnboundedReceiver<SliceUpdate>,
    ) -> Self {
        Self {
            client,
            namespace,
            updates,
        }
    }

    /// Consumes updates until the sending side is dropped. Failures are
    /// logged and the update is dropped; a later event or the periodic
    /// resync retries the same convergence.
    pub async fn run(mut self) {
        while let Some(update) = self.updates.recv().await {
            match update {
                SliceUpdate::Added(slice) => {
                    let name = slice.name_unchecked();
                    tracing::debug!(slice = %name, "Handling added target EndpointSlice");
                    if let Err(error) = self.reconcile_added(&slice).await {
                        tracing::warn!(slice = %name, %error, "Failed to reconcile EndpointSlice");
                    }
                }
                SliceUpdate::EndpointsChanged(slice) => {
                    let name = slice.name_unchecked();
                    tracing::debug!(slice = %name, "Handling target EndpointSlice endpoint change");
                    if let Err(error) = self.reconcile_endpoints_changed(&slice).await {
                        tracing::warn!(slice = %name, %error, "Failed to reconcile EndpointSlice endpoints");
                    }
                }
                SliceUpdate::Deleted {
                    name,
                    service_name,
                    cluster_name,
                } => {
                    tracing::debug!(slice = %name, "Handling target EndpointSlice deletion");
                    if let Err(error) = self.reconcile_deleted(&service_name, &cluster_name).await {
                        tracing::warn!(slice = %name, %error, "Failed to reconcile EndpointSlice deletion");
                    }
                }
            }
        }
    }

    /// Creates the global slice for a newly observed target slice.
    async fn reconcile_added(&self, target: &EndpointSlice) -> Result<()> {
        let service_name = label(target, labels::SERVICE_NAME);
        let cluster_name = label(target, labels::CLUSTER_NAME);
        let global_slice_name = naming::global_endpoint_slice_name(&service_name);

        let api = Api::<EndpointSlice>::namespaced(self.client.clone(), &self.namespace);
        match api.get(&global_slice_name).await {
            Ok(_) => {
                tracing::debug!(slice = %global_slice_name, "Global EndpointSlice already exists");
                return Ok(());
            }
            Err(error) if k8s::is_not_found(&error) => {}
            Err(error) => {
                return Err(error).with_context(|| {
                    format!("failed to get global EndpointSlice {global_slice_name}")
                });
            }
        }

        let Some(global_service_name) = naming::global_service_name(&service_name, &cluster_name)
        else {
            tracing::warn!(
                service = %service_name,
                cluster = %cluster_name,
                "Cluster name does not appear in the target service name"
            );
            return Ok(());
        };
        let Some(endpoints) = rewrite_endpoints(&target.endpoints, &cluster_name) else {
            tracing::info!(
                slice = %target.name_unchecked(),
                "Endpoint hostnames not yet populated; skipping"
            );
            return Ok(());
        };

        let global = mk_global_slice(
            &global_slice_name,
            &self.namespace,
            &global_service_name,
            &service_name,
            &cluster_name,
            endpoints,
            target,
        );
        match api.create(&PostParams::default(), &global).await {
            Ok(created) => {
                tracing::info!(
                    slice = %created.name_unchecked(),
                    namespace = %self.namespace,
                    service = %global_service_name,
                    "Created global EndpointSlice"
                );
                Ok(())
            }
            Err(error) if k8s::is_already_exists(&error) => {
                tracing::debug!(slice = %global_slice_name, "Global EndpointSlice already exists");
                Ok(())
            }
            Err(error) => Err(error).with_context(|| {
                format!("failed to create global EndpointSlice {global_slice_name}")
            }),
        }
    }

    /// Replaces the global slice's endpoints with the target's latest state.
    ///
    /// The global slice must already exist; there is no self-heal create on
    /// this path.
    async fn reconcile_endpoints_changed(&self, target: &EndpointSlice) -> Result<()> {
        let service_name = label(target, labels::SERVICE_NAME);
        let cluster_name = label(target, labels::CLUSTER_NAME);
        let global_slice_name = naming::global_endpoint_slice_name(&service_name);

        let api = Api::<EndpointSlice>::namespaced(self.client.clone(), &self.namespace);
        let mut global = api.get(&global_slice_name).await.with_context(|| {
            format!("failed to get global EndpointSlice {global_slice_name} for update")
        })?;

        let Some(endpoints) = rewrite_endpoints(&target.endpoints, &cluster_name) else {
            tracing::info!(
                slice = %target.name_unchecked(),
                "Endpoint hostnames not yet populated; skipping"
            );
            return Ok(());
        };

        // Full replacement: the global slice replicates the latest target
        // state, endpoints are never merged across events.
        global.endpoints = endpoints;
        global.ports = target.ports.clone();
        api.replace(&global_slice_name, &PostParams::default(), &global)
            .await
            .with_context(|| {
                format!("failed to update global EndpointSlice {global_slice_name}")
            })?;
        tracing::info!(slice = %global_slice_name, "Updated global EndpointSlice");
        Ok(())
    }

    /// Deletes the global slice and, when it was the last one backing the
    /// global service, the global service itself. This is the only path
    /// that removes a global service.
    async fn reconcile_deleted(&self, service_name: &str, cluster_name: &str) -> Result<()> {
        let global_slice_name = naming::global_endpoint_slice_name(service_name);

        let api = Api::<EndpointSlice>::namespaced(self.client.clone(), &self.namespace);
        api.delete(&global_slice_name, &DeleteParams::default())
            .await
            .with_context(|| {
                format!("failed to delete global EndpointSlice {global_slice_name}")
            })?;
        tracing::info!(slice = %global_slice_name, "Deleted global EndpointSlice");

        let Some(global_service_name) = naming::global_service_name(service_name, cluster_name)
        else {
            tracing::warn!(
                service = %service_name,
                cluster = %cluster_name,
                "Cluster name does not appear in the target service name"
            );
            return Ok(());
        };

        let params = ListParams::default()
            .labels(&format!("{}={}", labels::SERVICE_NAME, global_service_name));
        let remaining = api.list(&params).await.with_context(|| {
            format!("failed to list EndpointSlices backing {global_service_name}")
        })?;
        if !remaining.items.is_empty() {
            tracing::debug!(
                service = %global_service_name,
                remaining = remaining.items.len(),
                "Global service still has backing EndpointSlices"
            );
            return Ok(());
        }

        let services = Api::<Service>::namespaced(self.client.clone(), &self.namespace);
        match services
            .delete(&global_service_name, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                tracing::info!(service = %global_service_name, "Deleted orphaned global service");
                Ok(())
            }
            Err(error) if k8s::is_not_found(&error) => {
                tracing::debug!(service = %global_service_name, "Global service already removed");
                Ok(())
            }
            Err(error) => Err(error).with_context(|| {
                format!("failed to delete global service {global_service_name}")
            }),
        }
    }
}

fn label(slice: &EndpointSlice, key: &str) -> String {
    slice.labels().get(key).cloned().unwrap_or_default()
}

/// Rewrites every endpoint hostname to `<hostname>-<cluster>`.
///
/// Returns `None` when any endpoint has no hostname: the mirror briefly
/// publishes gateway addresses without hostnames while a remote cluster
/// resyncs, and a slice in that state must not be replicated.
fn rewrite_endpoints(endpoints: &[Endpoint], cluster_name: &str) -> Option<Vec<Endpoint>> {
    endpoints
        .iter()
        .map(|endpoint| {
            let hostname = endpoint
                .hostname
                .as_deref()
                .filter(|hostname| !hostname.is_empty())?;
            let mut rewritten = endpoint.clone();
            rewritten.hostname = Some(format!("{hostname}-{cluster_name}"));
            Some(rewritten)
        })
        .collect()
}

/// Builds the global replica of a target slice, linked back to the target
/// service and cluster it was derived from.
fn mk_global_slice(
    name: &str,
    namespace: &str,
    global_service_name: &str,
    target_service_name: &str,
    cluster_name: &str,
    endpoints: Vec<Endpoint>,
    target: &EndpointSlice,
) -> EndpointSlice {
    EndpointSlice {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(
                [
                    (labels::SERVICE_NAME, global_service_name),
                    (labels::TARGET_MIRROR_SVC_NAME, target_service_name),
                    (labels::CLUSTER_NAME, cluster_name),
                ]
                .into_iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
            ),
            ..Default::default()
        },
        address_type: target.address_type.clone(),
        endpoints,
        ports: target.ports.clone(),
    }
}
