//! Decoding the global config from ConfigMap data
//!
//! Each setting lives under its own key. Scalars are plain strings, structured
//! values are YAML documents. Keys that are absent keep their defaults.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::node_selectors::validate_patterns;
use super::{GlobalConfig, ImageMatchStrategy};
use crate::{Error, Result};

const GLOBAL_ANNOTATIONS: &str = "globalAnnotations";
const GLOBAL_LABELS: &str = "globalLabels";
const LAUNCHER_IMAGE: &str = "launcherImage";
const LAUNCHER_IMAGE_PULL_POLICY: &str = "launcherImagePullPolicy";
const LAUNCHER_LOG_LEVEL: &str = "launcherLogLevel";
const PRIVILEGED_LAUNCHER: &str = "privilegedLauncher";
const CONTAINERLAB_DEBUG: &str = "containerlabDebug";
const CONTAINERLAB_TIMEOUT: &str = "containerlabTimeout";
const CONTAINERLAB_VERSION: &str = "containerlabVersion";
const EXTRA_ENV: &str = "extraEnv";
const RESOURCES_DEFAULT: &str = "resourcesDefault";
const RESOURCES_BY_CONTAINERLAB_KIND: &str = "resourcesByContainerlabKind";
const NODE_SELECTORS_BY_IMAGE: &str = "nodeSelectorsByImage";
const NODE_SELECTOR_MATCH_STRATEGY: &str = "nodeSelectorMatchStrategy";
const IMAGE_PULL_THROUGH_OVERRIDE: &str = "imagePullThroughOverride";
const CRI_SOCK_OVERRIDE: &str = "criSockOverride";
const CRI_KIND_OVERRIDE: &str = "criKindOverride";
const DOCKER_DAEMON_CONFIG: &str = "dockerDaemonConfig";
const DOCKER_CONFIG: &str = "dockerConfig";
const NAMING: &str = "naming";
const IN_CLUSTER_DNS_SUFFIX: &str = "inClusterDNSSuffix";

const KNOWN_KEYS: &[&str] = &[
    GLOBAL_ANNOTATIONS,
    GLOBAL_LABELS,
    LAUNCHER_IMAGE,
    LAUNCHER_IMAGE_PULL_POLICY,
    LAUNCHER_LOG_LEVEL,
    PRIVILEGED_LAUNCHER,
    CONTAINERLAB_DEBUG,
    CONTAINERLAB_TIMEOUT,
    CONTAINERLAB_VERSION,
    EXTRA_ENV,
    RESOURCES_DEFAULT,
    RESOURCES_BY_CONTAINERLAB_KIND,
    NODE_SELECTORS_BY_IMAGE,
    NODE_SELECTOR_MATCH_STRATEGY,
    IMAGE_PULL_THROUGH_OVERRIDE,
    CRI_SOCK_OVERRIDE,
    CRI_KIND_OVERRIDE,
    DOCKER_DAEMON_CONFIG,
    DOCKER_CONFIG,
    NAMING,
    IN_CLUSTER_DNS_SUFFIX,
];

impl GlobalConfig {
    /// Build a config from ConfigMap `data`, starting from defaults
    pub fn from_configmap_data(data: &BTreeMap<String, String>) -> Result<Self> {
        let mut config = Self::default();
        let reader = DataReader { data };

        for key in data.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                debug!(key = %key, "ignoring unknown global config key");
            }
        }

        reader.yaml(GLOBAL_ANNOTATIONS, &mut config.metadata.annotations)?;
        reader.yaml(GLOBAL_LABELS, &mut config.metadata.labels)?;

        let deployment = &mut config.deployment;
        reader.string(LAUNCHER_IMAGE, &mut deployment.launcher_image);
        reader.string(
            LAUNCHER_IMAGE_PULL_POLICY,
            &mut deployment.launcher_image_pull_policy,
        );
        reader.string(LAUNCHER_LOG_LEVEL, &mut deployment.launcher_log_level);
        reader.boolean(PRIVILEGED_LAUNCHER, &mut deployment.privileged_launcher)?;
        reader.boolean(CONTAINERLAB_DEBUG, &mut deployment.containerlab_debug)?;
        reader.string(CONTAINERLAB_TIMEOUT, &mut deployment.containerlab_timeout);
        reader.string(CONTAINERLAB_VERSION, &mut deployment.containerlab_version);
        reader.yaml(EXTRA_ENV, &mut deployment.extra_env)?;
        reader.yaml(RESOURCES_DEFAULT, &mut deployment.resources_default)?;
        reader.yaml(
            RESOURCES_BY_CONTAINERLAB_KIND,
            &mut deployment.resources_by_containerlab_kind,
        )?;
        reader.yaml(
            NODE_SELECTORS_BY_IMAGE,
            &mut deployment.node_selectors_by_image,
        )?;
        if let Some(raw) = reader.get(NODE_SELECTOR_MATCH_STRATEGY) {
            deployment.node_selector_match_strategy = raw
                .parse::<ImageMatchStrategy>()
                .map_err(|e| Error::config(NODE_SELECTOR_MATCH_STRATEGY, e))?;
        }
        validate_patterns(
            &deployment.node_selectors_by_image,
            deployment.node_selector_match_strategy,
        )
        .map_err(|e| Error::config(NODE_SELECTORS_BY_IMAGE, e))?;

        let image_pull = &mut config.image_pull;
        reader.string(
            IMAGE_PULL_THROUGH_OVERRIDE,
            &mut image_pull.pull_through_override,
        );
        reader.string(CRI_SOCK_OVERRIDE, &mut image_pull.cri_sock_override);
        reader.string(CRI_KIND_OVERRIDE, &mut image_pull.cri_kind_override);
        reader.string(DOCKER_DAEMON_CONFIG, &mut image_pull.docker_daemon_config);
        reader.string(DOCKER_CONFIG, &mut image_pull.docker_config);

        reader.string(NAMING, &mut config.naming);
        reader.string(IN_CLUSTER_DNS_SUFFIX, &mut config.in_cluster_dns_suffix);

        Ok(config)
    }

    /// Encode the config as ConfigMap data
    pub fn to_configmap_data(&self) -> Result<BTreeMap<String, String>> {
        let deployment = &self.deployment;
        let image_pull = &self.image_pull;

        let mut data = BTreeMap::from([
            (GLOBAL_ANNOTATIONS, to_yaml(&self.metadata.annotations)?),
            (GLOBAL_LABELS, to_yaml(&self.metadata.labels)?),
            (LAUNCHER_IMAGE, deployment.launcher_image.clone()),
            (
                LAUNCHER_IMAGE_PULL_POLICY,
                deployment.launcher_image_pull_policy.clone(),
            ),
            (LAUNCHER_LOG_LEVEL, deployment.launcher_log_level.clone()),
            (PRIVILEGED_LAUNCHER, deployment.privileged_launcher.to_string()),
            (CONTAINERLAB_DEBUG, deployment.containerlab_debug.to_string()),
            (CONTAINERLAB_TIMEOUT, deployment.containerlab_timeout.clone()),
            (CONTAINERLAB_VERSION, deployment.containerlab_version.clone()),
            (EXTRA_ENV, to_yaml(&deployment.extra_env)?),
            (
                RESOURCES_BY_CONTAINERLAB_KIND,
                to_yaml(&deployment.resources_by_containerlab_kind)?,
            ),
            (
                NODE_SELECTORS_BY_IMAGE,
                to_yaml(&deployment.node_selectors_by_image)?,
            ),
            (
                NODE_SELECTOR_MATCH_STRATEGY,
                deployment.node_selector_match_strategy.to_string(),
            ),
            (
                IMAGE_PULL_THROUGH_OVERRIDE,
                image_pull.pull_through_override.clone(),
            ),
            (CRI_SOCK_OVERRIDE, image_pull.cri_sock_override.clone()),
            (CRI_KIND_OVERRIDE, image_pull.cri_kind_override.clone()),
            (DOCKER_DAEMON_CONFIG, image_pull.docker_daemon_config.clone()),
            (DOCKER_CONFIG, image_pull.docker_config.clone()),
            (NAMING, self.naming.clone()),
            (IN_CLUSTER_DNS_SUFFIX, self.in_cluster_dns_suffix.clone()),
        ]);

        if let Some(resources) = &deployment.resources_default {
            data.insert(RESOURCES_DEFAULT, to_yaml(resources)?);
        }

        Ok(data
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect())
    }
}

struct DataReader<'a> {
    data: &'a BTreeMap<String, String>,
}

impl DataReader<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(|v| v.trim())
    }

    fn string(&self, key: &str, target: &mut String) {
        if let Some(value) = self.get(key) {
            *target = value.to_string();
        }
    }

    fn boolean(&self, key: &str, target: &mut bool) -> Result<()> {
        if let Some(value) = self.get(key) {
            *target = value
                .parse()
                .map_err(|_| Error::config(key, format!("expected true or false, got '{value}'")))?;
        }
        Ok(())
    }

    fn yaml<T: DeserializeOwned>(&self, key: &str, target: &mut T) -> Result<()> {
        match self.get(key) {
            Some(value) if !value.is_empty() => {
                *target = serde_yaml::from_str(value).map_err(|e| Error::config(key, e.to_string()))?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn to_yaml<T: Serialize>(value: &T) -> Result<String> {
    serde_yaml::to_string(value).map_err(|e| Error::serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    use super::*;

    fn data(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_data_is_default() {
        let config = GlobalConfig::from_configmap_data(&BTreeMap::new()).unwrap();
        assert_eq!(config, GlobalConfig::default());
    }

    #[test]
    fn parses_structured_values() {
        let config = GlobalConfig::from_configmap_data(&data(&[
            (GLOBAL_LABELS, "env: lab\nowner: netops\n"),
            (PRIVILEGED_LAUNCHER, " false "),
            (NAMING, "non-prefixed"),
            (NODE_SELECTOR_MATCH_STRATEGY, "prefix"),
            (
                RESOURCES_BY_CONTAINERLAB_KIND,
                "nokia_srlinux:\n  default:\n    requests:\n      cpu: 500m\n",
            ),
            (EXTRA_ENV, "- name: HTTP_PROXY\n  value: http://proxy:3128\n"),
        ]))
        .unwrap();

        assert_eq!(config.metadata.labels["owner"], "netops");
        assert!(!config.deployment.privileged_launcher);
        assert_eq!(config.naming, "non-prefixed");
        assert_eq!(
            config.deployment.node_selector_match_strategy,
            ImageMatchStrategy::Prefix
        );
        let srl = &config.deployment.resources_by_containerlab_kind["nokia_srlinux"]["default"];
        assert_eq!(
            srl.requests.as_ref().unwrap()["cpu"],
            Quantity("500m".to_string())
        );
        assert_eq!(config.deployment.extra_env[0].name, "HTTP_PROXY");
        // untouched keys keep defaults
        assert_eq!(config.in_cluster_dns_suffix, "svc.cluster.local");
    }

    #[test]
    fn malformed_value_names_key() {
        let err = GlobalConfig::from_configmap_data(&data(&[(CONTAINERLAB_DEBUG, "yes please")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config { ref key, .. } if key == CONTAINERLAB_DEBUG));

        let err = GlobalConfig::from_configmap_data(&data(&[(GLOBAL_ANNOTATIONS, "- a\n- b\n")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config { ref key, .. } if key == GLOBAL_ANNOTATIONS));
    }

    #[test]
    fn malformed_glob_pattern_names_key() {
        let err = GlobalConfig::from_configmap_data(&data(&[(
            NODE_SELECTORS_BY_IMAGE,
            "\"ghcr.io/[nokia*\":\n  pool: nokia\n",
        )]))
        .unwrap_err();
        assert!(matches!(err, Error::Config { ref key, .. } if key == NODE_SELECTORS_BY_IMAGE));

        // the same pattern is a plain literal under prefix matching
        let config = GlobalConfig::from_configmap_data(&data(&[
            (NODE_SELECTORS_BY_IMAGE, "\"ghcr.io/[nokia*\":\n  pool: nokia\n"),
            (NODE_SELECTOR_MATCH_STRATEGY, "prefix"),
        ]))
        .unwrap();
        assert_eq!(config.deployment.node_selectors_by_image.len(), 1);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config =
            GlobalConfig::from_configmap_data(&data(&[("somethingNew", "value")])).unwrap();
        assert_eq!(config, GlobalConfig::default());
    }

    #[test]
    fn encoded_defaults_decode_to_defaults() {
        let encoded = GlobalConfig::default().to_configmap_data().unwrap();
        assert_eq!(encoded[NAMING], "prefixed");
        assert!(!encoded.contains_key(RESOURCES_DEFAULT));

        let decoded = GlobalConfig::from_configmap_data(&encoded).unwrap();
        assert_eq!(decoded, GlobalConfig::default());
    }
}
