//! Global clabernetes configuration
//!
//! The configuration is a single snapshot ([`GlobalConfig`]) loaded from the
//! `<app>-config` ConfigMap and held by a [`ConfigStore`]. Readers only ever
//! get owned copies out of the store.

mod configmap;
pub mod node_selectors;
pub mod resources;
mod store;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements};

pub use node_selectors::ImageMatchStrategy;
pub use store::ConfigStore;

use crate::NAMING_MODE_PREFIXED;

/// Default suffix for in-cluster service names
pub const DEFAULT_IN_CLUSTER_DNS_SUFFIX: &str = "svc.cluster.local";

/// Default launcher image
pub const DEFAULT_LAUNCHER_IMAGE: &str = "ghcr.io/srl-labs/clabernetes/clabernetes-launcher:latest";

/// Default image pull-through mode
pub const DEFAULT_IMAGE_PULL_THROUGH_MODE: &str = "auto";

/// Process-wide configuration snapshot
#[derive(Clone, Debug, PartialEq)]
pub struct GlobalConfig {
    /// Annotations and labels applied to all managed resources
    pub metadata: Metadata,
    /// Launcher deployment settings
    pub deployment: Deployment,
    /// Image pull settings
    pub image_pull: ImagePull,
    /// Naming mode for generated resources
    pub naming: String,
    /// Suffix appended when building in-cluster service names
    pub in_cluster_dns_suffix: String,
}

/// Global metadata stamped on every managed resource
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Metadata {
    /// Global annotations
    pub annotations: BTreeMap<String, String>,
    /// Global labels
    pub labels: BTreeMap<String, String>,
}

/// Settings for launcher deployments
#[derive(Clone, Debug, PartialEq)]
pub struct Deployment {
    /// Launcher image reference
    pub launcher_image: String,
    /// Pull policy for the launcher image
    pub launcher_image_pull_policy: String,
    /// Log level handed to launchers
    pub launcher_log_level: String,
    /// Run launchers privileged
    pub privileged_launcher: bool,
    /// Enable containerlab debug output in launchers
    pub containerlab_debug: bool,
    /// Timeout passed to containerlab, as a duration string
    pub containerlab_timeout: String,
    /// Containerlab version to run, empty for the launcher default
    pub containerlab_version: String,
    /// Extra environment for launcher containers
    pub extra_env: Vec<EnvVar>,
    /// Applied when no kind/type specific override exists
    pub resources_default: Option<ResourceRequirements>,
    /// Overrides keyed by containerlab kind, then containerlab type (`default` for the kind)
    pub resources_by_containerlab_kind: BTreeMap<String, BTreeMap<String, ResourceRequirements>>,
    /// Node selectors keyed by image pattern (`default` when nothing else matches)
    pub node_selectors_by_image: BTreeMap<String, BTreeMap<String, String>>,
    /// How `node_selectors_by_image` patterns are matched against image names
    pub node_selector_match_strategy: ImageMatchStrategy,
}

impl Default for Deployment {
    fn default() -> Self {
        Self {
            launcher_image: DEFAULT_LAUNCHER_IMAGE.to_string(),
            launcher_image_pull_policy: "IfNotPresent".to_string(),
            launcher_log_level: "info".to_string(),
            privileged_launcher: true,
            containerlab_debug: false,
            containerlab_timeout: String::new(),
            containerlab_version: String::new(),
            extra_env: Vec::new(),
            resources_default: None,
            resources_by_containerlab_kind: BTreeMap::new(),
            node_selectors_by_image: BTreeMap::new(),
            node_selector_match_strategy: ImageMatchStrategy::default(),
        }
    }
}

/// Image pull settings for launchers
#[derive(Clone, Debug, PartialEq)]
pub struct ImagePull {
    /// Pull-through mode (`auto`, `always`, `never`)
    pub pull_through_override: String,
    /// Path to the CRI socket, overriding detection
    pub cri_sock_override: String,
    /// CRI kind, overriding detection from node info
    pub cri_kind_override: String,
    /// Secret holding a docker daemon config for launchers
    pub docker_daemon_config: String,
    /// Secret holding a docker client config for launchers
    pub docker_config: String,
}

impl Default for ImagePull {
    fn default() -> Self {
        Self {
            pull_through_override: DEFAULT_IMAGE_PULL_THROUGH_MODE.to_string(),
            cri_sock_override: String::new(),
            cri_kind_override: String::new(),
            docker_daemon_config: String::new(),
            docker_config: String::new(),
        }
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            metadata: Metadata::default(),
            deployment: Deployment::default(),
            image_pull: ImagePull::default(),
            naming: NAMING_MODE_PREFIXED.to_string(),
            in_cluster_dns_suffix: DEFAULT_IN_CLUSTER_DNS_SUFFIX.to_string(),
        }
    }
}
