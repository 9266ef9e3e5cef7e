//! Thread-safe holder for the global config snapshot
//!
//! Every getter takes the read side of a single lock and returns an owned
//! value, so callers can never reach the stored maps or vectors. The only
//! writer is [`ConfigStore::replace`], used by the ConfigMap watcher.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements};
use parking_lot::RwLock;

use super::node_selectors::resolve_node_selectors;
use super::resources::resolve_resources;
use super::GlobalConfig;
use crate::NAMING_MODE_PREFIXED;

/// Shared, lock-protected global configuration
#[derive(Debug, Default)]
pub struct ConfigStore {
    config: RwLock<GlobalConfig>,
}

impl ConfigStore {
    /// Create a store holding `config`
    pub fn new(config: GlobalConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    /// Swap in a freshly loaded snapshot
    pub fn replace(&self, config: GlobalConfig) {
        *self.config.write() = config;
    }

    /// Copy of the whole snapshot
    pub fn snapshot(&self) -> GlobalConfig {
        self.config.read().clone()
    }

    /// Annotations applied to all managed resources
    pub fn global_annotations(&self) -> BTreeMap<String, String> {
        self.config.read().metadata.annotations.clone()
    }

    /// Labels applied to all managed resources
    pub fn global_labels(&self) -> BTreeMap<String, String> {
        self.config.read().metadata.labels.clone()
    }

    /// Annotations and labels, copied under a single lock acquisition
    pub fn all_metadata(&self) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
        let config = self.config.read();

        (
            config.metadata.annotations.clone(),
            config.metadata.labels.clone(),
        )
    }

    /// Resources for a containerlab kind/type, see [`resolve_resources`] for ordering
    pub fn resources_for_containerlab_kind(
        &self,
        containerlab_kind: &str,
        containerlab_type: &str,
    ) -> Option<ResourceRequirements> {
        let config = self.config.read();

        resolve_resources(
            &config.deployment.resources_by_containerlab_kind,
            config.deployment.resources_default.as_ref(),
            containerlab_kind,
            containerlab_type,
        )
    }

    /// Node selectors for pods running `image`; empty when no rule matches
    pub fn node_selectors_by_image(&self, image: &str) -> BTreeMap<String, String> {
        let config = self.config.read();

        resolve_node_selectors(
            image,
            &config.deployment.node_selectors_by_image,
            config.deployment.node_selector_match_strategy,
        )
    }

    /// Whether launchers run privileged
    pub fn privileged_launcher(&self) -> bool {
        self.config.read().deployment.privileged_launcher
    }

    /// Whether containerlab debug is enabled
    pub fn containerlab_debug(&self) -> bool {
        self.config.read().deployment.containerlab_debug
    }

    /// Containerlab timeout string
    pub fn containerlab_timeout(&self) -> String {
        self.config.read().deployment.containerlab_timeout.clone()
    }

    /// Containerlab version string
    pub fn containerlab_version(&self) -> String {
        self.config.read().deployment.containerlab_version.clone()
    }

    /// Suffix for in-cluster service names
    pub fn in_cluster_dns_suffix(&self) -> String {
        self.config.read().in_cluster_dns_suffix.clone()
    }

    /// Image pull-through mode
    pub fn image_pull_through_mode(&self) -> String {
        self.config.read().image_pull.pull_through_override.clone()
    }

    /// CRI socket override
    pub fn image_pull_cri_sock_override(&self) -> String {
        self.config.read().image_pull.cri_sock_override.clone()
    }

    /// CRI kind override
    pub fn image_pull_cri_kind_override(&self) -> String {
        self.config.read().image_pull.cri_kind_override.clone()
    }

    /// Docker daemon config secret name
    pub fn docker_daemon_config(&self) -> String {
        self.config.read().image_pull.docker_daemon_config.clone()
    }

    /// Docker client config secret name
    pub fn docker_config(&self) -> String {
        self.config.read().image_pull.docker_config.clone()
    }

    /// Launcher image reference
    pub fn launcher_image(&self) -> String {
        self.config.read().deployment.launcher_image.clone()
    }

    /// Launcher image pull policy
    pub fn launcher_image_pull_policy(&self) -> String {
        self.config.read().deployment.launcher_image_pull_policy.clone()
    }

    /// Launcher log level
    pub fn launcher_log_level(&self) -> String {
        self.config.read().deployment.launcher_log_level.clone()
    }

    /// Extra launcher environment
    pub fn extra_env(&self) -> Vec<EnvVar> {
        self.config.read().deployment.extra_env.clone()
    }

    /// True unless the naming mode is exactly `prefixed`
    ///
    /// Empty or unknown naming modes remove the prefix.
    pub fn remove_topology_prefix(&self) -> bool {
        self.config.read().naming != NAMING_MODE_PREFIXED
    }
}
