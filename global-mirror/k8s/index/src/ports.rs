//! Port reconciliation between target services and their global aggregator.

use linkerd_global_mirror_k8s_api::ServicePort;

/// Merges a target service's ports into the global service's port list.
///
/// Ports are compared by protocol, number, and target port; names never
/// participate in identity. The merge only grows the global list. When it
/// grows, every port is renamed `port-<index>` — the API rejects multi-port
/// specs whose ports are not uniquely named — and `(merged, true)` is
/// returned. Otherwise the list is empty and the flag is false; callers
/// must branch on the flag, not on emptiness.
pub fn reconcile(target: &[ServicePort], global: &[ServicePort]) -> (Vec<ServicePort>, bool) {
    let mut merged = global.to_vec();
    for port in target {
        if !merged.iter().any(|existing| same_port(existing, port)) {
            merged.push(port.clone());
        }
    }

    if merged.len() == global.len() {
        return (Vec::new(), false);
    }

    for (index, port) in merged.iter_mut().enumerate() {
        port.name = Some(format!("port-{index}"));
    }
    (merged, true)
}

fn same_port(a: &ServicePort, b: &ServicePort) -> bool {
    a.protocol == b.protocol && a.port == b.port && a.target_port == b.target_port
}
