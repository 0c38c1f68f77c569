use crate::{Index, ServiceUpdate, SharedIndex, SliceUpdate};
use kubert::index::IndexNamespacedResource;
use linkerd_global_mirror_k8s_api::{
    labels, Endpoint, EndpointSlice, ObjectMeta, Service, ServicePort, ServiceSpec,
};
use maplit::{btreemap, convert_args};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver};

struct TestIndex {
    index: SharedIndex,
    services: UnboundedReceiver<ServiceUpdate>,
    slices: UnboundedReceiver<SliceUpdate>,
}

impl TestIndex {
    fn new() -> Self {
        let (service_tx, services) = mpsc::unbounded_channel();
        let (slice_tx, slices) = mpsc::unbounded_channel();
        Self {
            index: Index::shared(service_tx, slice_tx),
            services,
            slices,
        }
    }

    fn delete_service(&self, namespace: &str, name: &str) {
        let mut index = self.index.write();
        IndexNamespacedResource::<Service>::delete(
            &mut *index,
            namespace.to_string(),
            name.to_string(),
        );
    }

    fn delete_slice(&self, namespace: &str, name: &str) {
        let mut index = self.index.write();
        IndexNamespacedResource::<EndpointSlice>::delete(
            &mut *index,
            namespace.to_string(),
            name.to_string(),
        );
    }
}

fn mk_target_service(name: &str, cluster: &str, version: &str, ports: &[(i32, i32)]) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            resource_version: Some(version.to_string()),
            labels: Some(convert_args!(btreemap!(
                labels::MIRRORED_SERVICE => "true",
                labels::CLUSTER_NAME => cluster,
            ))),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(
                ports
                    .iter()
                    .map(|&(port, target_port)| ServicePort {
                        port,
                        target_port: Some(
                            k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(
                                target_port,
                            ),
                        ),
                        protocol: Some("TCP".to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mk_target_slice(
    name: &str,
    service_name: &str,
    cluster: &str,
    version: &str,
    hostnames: &[&str],
) -> EndpointSlice {
    EndpointSlice {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            resource_version: Some(version.to_string()),
            labels: Some(convert_args!(btreemap!(
                labels::MIRRORED_SERVICE => "true",
                labels::CLUSTER_NAME => cluster,
                labels::SERVICE_NAME => service_name,
            ))),
            ..Default::default()
        },
        address_type: "IPv4".to_string(),
        endpoints: hostnames
            .iter()
            .map(|hostname| Endpoint {
                addresses: vec!["10.42.0.1".to_string()],
                hostname: Some(hostname.to_string()),
                ..Default::default()
            })
            .collect(),
        ports: None,
    }
}

#[test]
fn first_sight_of_a_service_dispatches_added() {
    let mut test = TestIndex::new();
    let service = mk_target_service("echo-target1", "target1", "1", &[(80, 8080)]);

    test.index.write().apply(service.clone());

    assert_eq!(test.services.try_recv(), Ok(ServiceUpdate::Added(service)));
    assert_eq!(test.services.try_recv(), Err(TryRecvError::Empty));
}

#[test]
fn mirror_label_value_is_not_checked() {
    let mut test = TestIndex::new();
    let mut service = mk_target_service("echo-target1", "target1", "1", &[(80, 8080)]);
    service
        .metadata
        .labels
        .as_mut()
        .unwrap()
        .insert(labels::MIRRORED_SERVICE.to_string(), "false".to_string());

    test.index.write().apply(service);

    assert!(matches!(
        test.services.try_recv(),
        Ok(ServiceUpdate::Added(_))
    ));
}

#[test]
fn unlabeled_services_are_ignored() {
    let mut test = TestIndex::new();
    let mut service = mk_target_service("echo-target1", "target1", "1", &[(80, 8080)]);
    service.metadata.labels = None;

    test.index.write().apply(service);

    assert_eq!(test.services.try_recv(), Err(TryRecvError::Empty));
}

#[test]
fn headless_mirror_children_are_ignored() {
    let mut test = TestIndex::new();
    let mut service = mk_target_service("echo-0-target1", "target1", "1", &[(80, 8080)]);
    service.metadata.labels.as_mut().unwrap().insert(
        labels::HEADLESS_MIRROR_SVC_NAME.to_string(),
        "echo-target1".to_string(),
    );

    test.index.write().apply(service);

    assert_eq!(test.services.try_recv(), Err(TryRecvError::Empty));
}

#[test]
fn unchanged_resource_version_is_dropped() {
    let mut test = TestIndex::new();
    let service = mk_target_service("echo-target1", "target1", "1", &[(80, 8080)]);

    test.index.write().apply(service.clone());
    test.index.write().apply(service);

    assert!(matches!(
        test.services.try_recv(),
        Ok(ServiceUpdate::Added(_))
    ));
    assert_eq!(test.services.try_recv(), Err(TryRecvError::Empty));
}

#[test]
fn port_change_dispatches_ports_changed() {
    let mut test = TestIndex::new();
    test.index
        .write()
        .apply(mk_target_service("echo-target1", "target1", "1", &[(80, 8080)]));
    let _ = test.services.try_recv();

    let changed = mk_target_service("echo-target1", "target1", "2", &[(80, 8080), (90, 9090)]);
    test.index.write().apply(changed.clone());

    assert_eq!(
        test.services.try_recv(),
        Ok(ServiceUpdate::PortsChanged(changed))
    );
}

#[test]
fn update_without_port_change_is_a_no_op() {
    let mut test = TestIndex::new();
    test.index
        .write()
        .apply(mk_target_service("echo-target1", "target1", "1", &[(80, 8080)]));
    let _ = test.services.try_recv();

    // Same ports at a new resource version, e.g. an annotation change.
    test.index
        .write()
        .apply(mk_target_service("echo-target1", "target1", "2", &[(80, 8080)]));

    assert_eq!(test.services.try_recv(), Err(TryRecvError::Empty));
}

#[test]
fn service_delete_carries_the_stored_cluster() {
    let mut test = TestIndex::new();
    test.index
        .write()
        .apply(mk_target_service("echo-target1", "target1", "1", &[(80, 8080)]));
    let _ = test.services.try_recv();

    test.delete_service("default", "echo-target1");

    assert_eq!(
        test.services.try_recv(),
        Ok(ServiceUpdate::Deleted {
            name: "echo-target1".to_string(),
            cluster_name: "target1".to_string(),
        })
    );
}

#[test]
fn unknown_service_delete_is_ignored() {
    let mut test = TestIndex::new();
    test.delete_service("default", "echo-target1");
    assert_eq!(test.services.try_recv(), Err(TryRecvError::Empty));
}

#[test]
fn first_sight_of_a_slice_dispatches_added() {
    let mut test = TestIndex::new();
    let slice = mk_target_slice(
        "echo-target1-abc12",
        "echo-target1",
        "target1",
        "1",
        &["echo-0"],
    );

    test.index.write().apply(slice.clone());

    assert_eq!(test.slices.try_recv(), Ok(SliceUpdate::Added(slice)));
}

#[test]
fn slice_without_service_label_is_dropped() {
    let mut test = TestIndex::new();
    let mut slice = mk_target_slice(
        "echo-target1-abc12",
        "echo-target1",
        "target1",
        "1",
        &["echo-0"],
    );
    slice
        .metadata
        .labels
        .as_mut()
        .unwrap()
        .remove(labels::SERVICE_NAME);

    test.index.write().apply(slice);

    assert_eq!(test.slices.try_recv(), Err(TryRecvError::Empty));
}

#[test]
fn endpoint_change_dispatches_endpoints_changed() {
    let mut test = TestIndex::new();
    test.index.write().apply(mk_target_slice(
        "echo-target1-abc12",
        "echo-target1",
        "target1",
        "1",
        &["echo-0"],
    ));
    let _ = test.slices.try_recv();

    let changed = mk_target_slice(
        "echo-target1-abc12",
        "echo-target1",
        "target1",
        "2",
        &["echo-0", "echo-1"],
    );
    test.index.write().apply(changed.clone());

    assert_eq!(
        test.slices.try_recv(),
        Ok(SliceUpdate::EndpointsChanged(changed))
    );
}

#[test]
fn slice_update_without_endpoint_change_is_a_no_op() {
    let mut test = TestIndex::new();
    test.index.write().apply(mk_target_slice(
        "echo-target1-abc12",
        "echo-target1",
        "target1",
        "1",
        &["echo-0"],
    ));
    let _ = test.slices.try_recv();

    // Ports-only changes do not touch the global slice.
    let mut ports_changed = mk_target_slice(
        "echo-target1-abc12",
        "echo-target1",
        "target1",
        "2",
        &["echo-0"],
    );
    ports_changed.ports = Some(Vec::new());
    test.index.write().apply(ports_changed);

    assert_eq!(test.slices.try_recv(), Err(TryRecvError::Empty));
}

#[test]
fn slice_delete_carries_the_stored_labels() {
    let mut test = TestIndex::new();
    test.index.write().apply(mk_target_slice(
        "echo-target1-abc12",
        "echo-target1",
        "target1",
        "1",
        &["echo-0"],
    ));
    let _ = test.slices.try_recv();

    test.delete_slice("default", "echo-target1-abc12");

    assert_eq!(
        test.slices.try_recv(),
        Ok(SliceUpdate::Deleted {
            name: "echo-target1-abc12".to_string(),
            service_name: "echo-target1".to_string(),
            cluster_name: "target1".to_string(),
        })
    );
}

#[test]
fn resync_replays_tracked_state_through_the_add_path() {
    let mut test = TestIndex::new();
    let service = mk_target_service("echo-target1", "target1", "1", &[(80, 8080)]);
    let slice = mk_target_slice(
        "echo-target1-abc12",
        "echo-target1",
        "target1",
        "1",
        &["echo-0"],
    );
    test.index.write().apply(service.clone());
    test.index.write().apply(slice.clone());
    let _ = test.services.try_recv();
    let _ = test.slices.try_recv();

    test.index.read().resync();

    assert_eq!(test.services.try_recv(), Ok(ServiceUpdate::Added(service)));
    assert_eq!(test.slices.try_recv(), Ok(SliceUpdate::Added(slice)));
}

#[test]
fn resync_replays_nothing_when_empty() {
    let mut test = TestIndex::new();
    test.index.read().resync();
    assert_eq!(test.services.try_recv(), Err(TryRecvError::Empty));
    assert_eq!(test.slices.try_recv(), Err(TryRecvError::Empty));
}
