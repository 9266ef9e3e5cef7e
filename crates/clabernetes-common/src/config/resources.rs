//! Resource requirement resolution for containerlab kinds
//!
//! Lookup order is exact `(kind, type)`, then the kind's `default` entry, then
//! the global default.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;

/// Type key holding the kind-level default
pub const DEFAULT_TYPE_KEY: &str = "default";

/// Resolve the resources to apply for a containerlab kind/type pair
pub fn resolve_resources(
    by_kind: &BTreeMap<String, BTreeMap<String, ResourceRequirements>>,
    global_default: Option<&ResourceRequirements>,
    containerlab_kind: &str,
    containerlab_type: &str,
) -> Option<ResourceRequirements> {
    let Some(kind_resources) = by_kind.get(containerlab_kind) else {
        return global_default.cloned();
    };

    kind_resources
        .get(containerlab_type)
        .or_else(|| kind_resources.get(DEFAULT_TYPE_KEY))
        .or(global_default)
        .cloned()
}
