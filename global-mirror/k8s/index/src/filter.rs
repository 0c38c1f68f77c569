//! Relevance predicate for mirrored resources.

use linkerd_global_mirror_k8s_api::labels;
use std::collections::BTreeMap;

/// Returns true if a resource with the given labels is a target for
/// aggregation.
///
/// Only the presence of the mirror label is checked, never its value; the
/// mirror has shipped values other than `"true"` here and the aggregator
/// must keep accepting them. Resources carrying the headless-child label
/// are managed by the mirror itself and are skipped.
pub fn accepts(labels: &BTreeMap<String, String>) -> bool {
    labels.contains_key(labels::MIRRORED_SERVICE)
        && !labels.contains_key(labels::HEADLESS_MIRROR_SVC_NAME)
}
