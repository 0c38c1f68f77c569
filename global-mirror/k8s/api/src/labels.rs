//! Label vocabulary shared with the multicluster service mirror.
//!
//! None of these keys are invented here: the `mirror.linkerd.io` labels are
//! written by the service mirror on every resource it copies in from a
//! remote cluster, and `kubernetes.io/service-name` is the standard label
//! linking an EndpointSlice to its Service.

/// Marks a resource as mirrored in from a remote cluster.
pub const MIRRORED_SERVICE: &str = "mirror.linkerd.io/mirrored-service";

/// Set on the per-hostname children of a headless mirror service. Resources
/// carrying this key are owned by the mirror itself and are never
/// aggregated.
pub const HEADLESS_MIRROR_SVC_NAME: &str = "mirror.linkerd.io/headless-mirror-svc-name";

/// Names the remote cluster a mirrored resource came from.
pub const CLUSTER_NAME: &str = "mirror.linkerd.io/cluster-name";

/// Links an EndpointSlice to the Service it backs.
pub const SERVICE_NAME: &str = "kubernetes.io/service-name";

/// Names the mirrored service a global EndpointSlice was derived from.
pub const TARGET_MIRROR_SVC_NAME: &str = "mirror.linkerd.io/target-mirror-svc-name";

/// Names the cluster whose target first caused a global service to be
/// created.
pub const GLOBAL_MIRROR_FOR: &str = "mirror.linkerd.io/global-mirror-for";
