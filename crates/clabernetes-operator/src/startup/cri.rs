//! Container runtime detection

use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};
use kube::Client;
use tracing::{debug, warn};

/// CRI kind reported when it cannot be detected
pub const CRI_KIND_UNKNOWN: &str = "unknown";

/// CRI kind from a node's `containerRuntimeVersion` (e.g. `containerd://1.7.2`)
pub fn cri_kind_from_runtime_version(version: &str) -> Option<String> {
    version
        .split_once("://")
        .map(|(kind, _)| kind.trim().to_ascii_lowercase())
        .filter(|kind| !kind.is_empty())
}

/// Determine the cluster's CRI kind
///
/// A non-empty `override_kind` from the global config wins; otherwise the
/// first node's runtime version is inspected. Detection problems are not
/// fatal, they yield [`CRI_KIND_UNKNOWN`].
pub async fn detect_cri_kind(client: &Client, override_kind: &str) -> String {
    if !override_kind.is_empty() {
        debug!(cri_kind = %override_kind, "using CRI kind override");
        return override_kind.to_string();
    }

    let nodes: Api<Node> = Api::all(client.clone());
    let list = match nodes.list(&ListParams::default().limit(1)).await {
        Ok(list) => list,
        Err(e) => {
            warn!(error = %e, "failed listing nodes for CRI detection");
            return CRI_KIND_UNKNOWN.to_string();
        }
    };

    list.items
        .first()
        .and_then(|node| node.status.as_ref())
        .and_then(|status| status.node_info.as_ref())
        .and_then(|info| cri_kind_from_runtime_version(&info.container_runtime_version))
        .unwrap_or_else(|| {
            warn!("could not determine CRI kind from node info");
            CRI_KIND_UNKNOWN.to_string()
        })
}
