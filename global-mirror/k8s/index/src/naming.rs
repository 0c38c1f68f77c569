//! Name derivation for global mirror resources.
//!
//! Ownership between target and global resources is purely by naming
//! convention; every derivation lives here so the two reconcilers cannot
//! drift apart.

const GLOBAL_SUFFIX: &str = "-global";

/// Derives the global service name for a mirrored resource.
///
/// A target named `nginx-svc-k3d-west` from cluster `k3d-west` aggregates
/// under `nginx-svc-global`. Returns `None` when the cluster name is empty
/// or does not appear in the target name; callers log and drop the event.
pub fn global_service_name(target_name: &str, cluster_name: &str) -> Option<String> {
    if cluster_name.is_empty() {
        return None;
    }
    let suffix = format!("-{cluster_name}");
    let (base, _) = target_name.split_once(&suffix)?;
    Some(format!("{base}{GLOBAL_SUFFIX}"))
}

/// Derives the global EndpointSlice name from the `kubernetes.io/service-name`
/// label of a mirrored EndpointSlice (not from the slice's own name).
pub fn global_endpoint_slice_name(target_service_name: &str) -> String {
    format!("{target_service_name}{GLOBAL_SUFFIX}")
}
