//! Loading and bootstrapping the global config ConfigMap

use std::collections::BTreeMap;

use clabernetes_common::{config_map_name, ConfigStore, GlobalConfig};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::Client;
use tracing::{info, warn};

use crate::Error;

const LABEL_APP_NAME: &str = "app.kubernetes.io/name";
const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Decode `config_map` into `store`
///
/// On a decode error the store keeps its previous snapshot.
pub fn apply_config_map(store: &ConfigStore, config_map: &ConfigMap) -> Result<(), Error> {
    let empty = BTreeMap::new();
    let data = config_map.data.as_ref().unwrap_or(&empty);

    let config = GlobalConfig::from_configmap_data(data)?;
    store.replace(config);
    Ok(())
}

/// Load the global config into `store` at startup
///
/// A missing ConfigMap leaves the defaults in place; a malformed one is an error.
pub async fn load_config(
    client: &Client,
    namespace: &str,
    app_name: &str,
    store: &ConfigStore,
) -> Result<(), Error> {
    let name = config_map_name(app_name);
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);

    match api.get_opt(&name).await? {
        Some(config_map) => {
            apply_config_map(store, &config_map)?;
            info!(config_map = %name, "loaded global config");
        }
        None => {
            warn!(config_map = %name, namespace = %namespace, "global config not found, using defaults");
        }
    }

    Ok(())
}

/// Create the global config ConfigMap with defaults if it does not exist
///
/// Returns whether it was created.
pub async fn bootstrap_config_map(
    client: &Client,
    namespace: &str,
    app_name: &str,
) -> Result<bool, Error> {
    let name = config_map_name(app_name);
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);

    let config_map = ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([
                (LABEL_APP_NAME.to_string(), app_name.to_string()),
                (LABEL_MANAGED_BY.to_string(), app_name.to_string()),
            ])),
            ..Default::default()
        },
        data: Some(GlobalConfig::default().to_configmap_data()?),
        ..Default::default()
    };

    match api.create(&PostParams::default(), &config_map).await {
        Ok(_) => {
            info!(config_map = %name, "created global config with defaults");
            Ok(true)
        }
        Err(kube::Error::Api(e)) if e.code == 409 => {
            info!(config_map = %name, "global config already exists, leaving it untouched");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_map(data: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn applies_decoded_config() {
        let store = ConfigStore::new(GlobalConfig::default());

        apply_config_map(&store, &config_map(&[("naming", "non-prefixed")])).unwrap();

        assert!(store.remove_topology_prefix());
    }

    #[test]
    fn bad_config_keeps_previous_snapshot() {
        let store = ConfigStore::new(GlobalConfig::default());
        apply_config_map(&store, &config_map(&[("globalLabels", "env: lab")])).unwrap();

        let result = apply_config_map(&store, &config_map(&[("privilegedLauncher", "maybe")]));

        assert!(matches!(result, Err(Error::Common(_))));
        assert_eq!(store.global_labels()["env"], "lab");
    }

    #[test]
    fn config_map_without_data_resets_to_defaults() {
        let store = ConfigStore::new(GlobalConfig {
            naming: "non-prefixed".to_string(),
            ..Default::default()
        });

        apply_config_map(&store, &ConfigMap::default()).unwrap();

        assert_eq!(store.snapshot(), GlobalConfig::default());
    }
}
