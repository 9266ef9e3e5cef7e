//! Cluster access used by the startup paths

use std::sync::Arc;

use async_trait::async_trait;
use clabernetes_common::leader_election::{KubeLeaseClient, LeaseClient};
use clabernetes_common::ConfigStore;
use kube::Client;
#[cfg(test)]
use mockall::automock;

use crate::runtime::{new_manager, ClusterRuntime};
use crate::startup::{bootstrap_config_map, detect_cri_kind, load_config};
use crate::Error;

/// Everything the initializer and controller paths ask of the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Load the global config into `store`
    async fn load_config(
        &self,
        namespace: &str,
        app_name: &str,
        store: Arc<ConfigStore>,
    ) -> Result<(), Error>;

    /// CRI kind of the cluster, `override_kind` when non-empty
    async fn detect_cri_kind(&self, override_kind: &str) -> String;

    /// Create the global config ConfigMap if missing; whether it was created
    async fn bootstrap_config(&self, namespace: &str, app_name: &str) -> Result<bool, Error>;

    /// Connect the runtime manager
    async fn new_manager(
        &self,
        app_name: &str,
        namespace: &str,
    ) -> Result<Arc<dyn ClusterRuntime>, Error>;

    /// Lease access for the election on `namespace/lease_name`
    fn lease_client(&self, namespace: &str, lease_name: &str) -> Arc<dyn LeaseClient>;
}

/// [`Cluster`] backed by a Kubernetes client
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Wrap `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn load_config(
        &self,
        namespace: &str,
        app_name: &str,
        store: Arc<ConfigStore>,
    ) -> Result<(), Error> {
        load_config(&self.client, namespace, app_name, &store).await
    }

    async fn detect_cri_kind(&self, override_kind: &str) -> String {
        detect_cri_kind(&self.client, override_kind).await
    }

    async fn bootstrap_config(&self, namespace: &str, app_name: &str) -> Result<bool, Error> {
        bootstrap_config_map(&self.client, namespace, app_name).await
    }

    async fn new_manager(
        &self,
        app_name: &str,
        namespace: &str,
    ) -> Result<Arc<dyn ClusterRuntime>, Error> {
        let manager = new_manager(self.client.clone(), app_name, namespace).await?;
        Ok(Arc::new(manager))
    }

    fn lease_client(&self, namespace: &str, lease_name: &str) -> Arc<dyn LeaseClient> {
        Arc::new(KubeLeaseClient::new(self.client.clone(), namespace, lease_name))
    }
}
