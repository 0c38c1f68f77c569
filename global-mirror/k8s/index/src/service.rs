use crate::{
    index::{service_ports, ServiceUpdate},
    naming, ports,
};
use anyhow::{Context, Result};
use linkerd_global_mirror_k8s_api::{
    self as k8s, labels, Api, ListParams, Namespace, ObjectMeta, PostParams, ResourceExt, Service,
    ServiceSpec,
};
use tokio::sync::mpsc::UnboundedReceiver;

/// Maintains global aggregator services in response to target service
/// events.
///
/// Every update triggers a fresh read of the global service from the API
/// server; nothing about the global state is cached between updates.
pub struct ServiceReconciler {
    client: k8s::Client,
    namespace: String,
    updates: UnboundedReceiver<ServiceUpdate>,
}

// === impl ServiceReconciler ===

impl ServiceReconciler {
    pub fn new(
        client: k8s::Client,
        namespace: String,
        updates: UnboundedReceiver<ServiceUpdate>,
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
                ServiceUpdate::Added(service) => {
                    let name = service.name_unchecked();
                    tracing::debug!(service = %name, "Handling added target service");
                    if let Err(error) = self.reconcile_added(&service).await {
                        tracing::warn!(service = %name, %error, "Failed to reconcile target service");
                    }
                }
                ServiceUpdate::PortsChanged(service) => {
                    let name = service.name_unchecked();
                    tracing::debug!(service = %name, "Handling target service port change");
                    if let Err(error) = self.reconcile_ports_changed(&service).await {
                        tracing::warn!(service = %name, %error, "Failed to reconcile target service ports");
                    }
                }
                ServiceUpdate::Deleted { name, cluster_name } => {
                    if let Err(error) = self.log_deleted(&name, &cluster_name).await {
                        tracing::warn!(service = %name, %error, "Failed to handle target service deletion");
                    }
                }
            }
        }
    }

    /// Ensures the global service exists and covers the target's ports.
    async fn reconcile_added(&self, target: &Service) -> Result<()> {
        let name = target.name_unchecked();
        let cluster_name = cluster_name(target);
        let Some(global_name) = naming::global_service_name(&name, &cluster_name) else {
            tracing::warn!(
                service = %name,
                cluster = %cluster_name,
                "Cluster name does not appear in the target service name"
            );
            return Ok(());
        };

        let api = Api::<Service>::namespaced(self.client.clone(), &self.namespace);
        match api.get(&global_name).await {
            Ok(global) => self.grow_ports(&api, target, global).await,
            Err(error) if k8s::is_not_found(&error) => {
                self.create_global(&api, target, &global_name, &cluster_name)
                    .await
            }
            Err(error) => Err(error)
                .with_context(|| format!("failed to get global service {global_name}")),
        }
    }

    async fn create_global(
        &self,
        api: &Api<Service>,
        target: &Service,
        global_name: &str,
        cluster_name: &str,
    ) -> Result<()> {
        self.ensure_namespace().await?;

        // Seed the port list through the parity engine so the ports carry
        // their `port-<index>` names from the start.
        let (ports, _) = ports::reconcile(service_ports(target), &[]);
        let global = mk_global_service(global_name, &self.namespace, cluster_name, ports);
        match api.create(&PostParams::default(), &global).await {
            Ok(_) => {
                tracing::info!(
                    service = %global_name,
                    namespace = %self.namespace,
                    "Created global service"
                );
                Ok(())
            }
            Err(error) if k8s::is_already_exists(&error) => {
                tracing::debug!(service = %global_name, "Global service already exists");
                Ok(())
            }
            Err(error) => Err(error)
                .with_context(|| format!("failed to create global service {global_name}")),
        }
    }

    /// Grows the global service's ports to cover a changed target.
    async fn reconcile_ports_changed(&self, target: &Service) -> Result<()> {
        let name = target.name_unchecked();
        let cluster_name = cluster_name(target);
        let Some(global_name) = naming::global_service_name(&name, &cluster_name) else {
            tracing::warn!(
                service = %name,
                cluster = %cluster_name,
                "Cluster name does not appear in the target service name"
            );
            return Ok(());
        };

        // Update reads resolve against the default namespace, not the
        // configured one.
        let get_api = Api::<Service>::namespaced(self.client.clone(), "default");
        let global = match get_api.get(&global_name).await {
            Ok(global) => global,
            Err(error) if k8s::is_not_found(&error) => {
                tracing::warn!(
                    service = %global_name,
                    "Global service not found; skipping port update"
                );
                return Ok(());
            }
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to get global service {global_name}"));
            }
        };

        let api = Api::<Service>::namespaced(self.client.clone(), &self.namespace);
        self.grow_ports(&api, target, global).await
    }

    async fn grow_ports(&self, api: &Api<Service>, target: &Service, global: Service) -> Result<()> {
        let (merged, changed) = ports::reconcile(service_ports(target), service_ports(&global));
        if !changed {
            return Ok(());
        }

        let name = global.name_unchecked();
        let mut updated = global;
        if let Some(spec) = updated.spec.as_mut() {
            spec.ports = Some(merged);
        }
        api.replace(&name, &PostParams::default(), &updated)
            .await
            .with_context(|| format!("failed to update ports on global service {name}"))?;
        tracing::info!(service = %name, "Updated global service ports");
        Ok(())
    }

    /// Target service deletions are only diagnosed; the global service is
    /// removed solely by the EndpointSlice delete cascade.
    async fn log_deleted(&self, name: &str, cluster_name: &str) -> Result<()> {
        if cluster_name.is_empty() {
            tracing::warn!(service = %name, "Deleted target service carried no cluster label");
            return Ok(());
        }

        let api = Api::<Service>::all(self.client.clone());
        let params =
            ListParams::default().labels(&format!("{}={}", labels::CLUSTER_NAME, cluster_name));
        let siblings = api.list(&params).await.with_context(|| {
            format!("failed to list target services for cluster {cluster_name}")
        })?;
        tracing::info!(
            service = %name,
            cluster = %cluster_name,
            remaining = siblings.items.len(),
            "Target service deleted; global service left in place"
        );
        Ok(())
    }

    async fn ensure_namespace(&self) -> Result<()> {
        let api = Api::<Namespace>::all(self.client.clone());
        match api.get(&self.namespace).await {
            Ok(_) => Ok(()),
            Err(error) if k8s::is_not_found(&error) => {
                let namespace = Namespace {
                    metadata: ObjectMeta {
                        name: Some(self.namespace.clone()),
                        ..Default::default()
                    },
                    ..Default::default()
                };
                match api.create(&PostParams::default(), &namespace).await {
                    Ok(_) => {
                        tracing::info!(namespace = %self.namespace, "Created namespace");
                        Ok(())
                    }
                    Err(error) if k8s::is_already_exists(&error) => Ok(()),
                    Err(error) => Err(error).with_context(|| {
                        format!("failed to create namespace {}", self.namespace)
                    }),
                }
            }
            Err(error) => {
                Err(error).with_context(|| format!("failed to get namespace {}", self.namespace))
            }
        }
    }
}

fn cluster_name(service: &Service) -> String {
    service
        .labels()
        .get(labels::CLUSTER_NAME)
        .cloned()
        .unwrap_or_default()
}

/// Builds the headless aggregator service for a cluster's target.
fn mk_global_service(
    name: &str,
    namespace: &str,
    cluster_name: &str,
    ports: Vec<k8s::ServicePort>,
) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(
                [(labels::GLOBAL_MIRROR_FOR.to_string(), cluster_name.to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}
