//! Cluster runtime manager
//!
//! Owns the long-running work done while holding the controller lease. For
//! now that is keeping the [`ConfigStore`] in sync with the global config
//! ConfigMap.

use std::sync::Arc;

use async_trait::async_trait;
use clabernetes_common::{config_map_name, ConfigStore};
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::startup::apply_config_map;
use crate::Error;

/// Leader-scoped work run against the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterRuntime: Send + Sync {
    /// Kubernetes version reported by the API server
    fn server_version(&self) -> String;

    /// Start watching the global config and wait for the initial sync
    ///
    /// The watcher stops when `leader` is cancelled. Returns the watcher task
    /// once the store reflects the ConfigMap's current state.
    async fn start(
        &self,
        leader: CancellationToken,
        store: Arc<ConfigStore>,
    ) -> Result<JoinHandle<()>, Error>;
}

/// Handle to the cluster the operator manages
#[derive(Clone)]
pub struct RuntimeManager {
    client: Client,
    app_name: String,
    namespace: String,
    server_version: String,
}

impl std::fmt::Debug for RuntimeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeManager")
            .field("app_name", &self.app_name)
            .field("namespace", &self.namespace)
            .field("server_version", &self.server_version)
            .finish()
    }
}

/// Create the runtime manager, verifying the API server is reachable
pub async fn new_manager(
    client: Client,
    app_name: &str,
    namespace: &str,
) -> Result<RuntimeManager, Error> {
    let info = client.apiserver_version().await.map_err(|e| Error::Manager {
        message: format!("api server not reachable: {e}"),
    })?;

    let server_version = format!("{}.{}", info.major, info.minor);
    debug!(version = %server_version, "connected to api server");

    Ok(RuntimeManager {
        client,
        app_name: app_name.to_string(),
        namespace: namespace.to_string(),
        server_version,
    })
}

#[async_trait]
impl ClusterRuntime for RuntimeManager {
    fn server_version(&self) -> String {
        self.server_version.clone()
    }

    async fn start(
        &self,
        leader: CancellationToken,
        store: Arc<ConfigStore>,
    ) -> Result<JoinHandle<()>, Error> {
        let name = config_map_name(&self.app_name);
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        let config = watcher::Config::default().fields(&format!("metadata.name={name}"));

        let (synced_tx, synced_rx) = oneshot::channel();
        let task_leader = leader.clone();

        info!(config_map = %name, namespace = %self.namespace, "starting global config watcher");

        let handle = tokio::spawn(async move {
            let stream = watcher::watcher(api, config).default_backoff();
            tokio::pin!(stream);
            let mut synced_tx = Some(synced_tx);

            loop {
                tokio::select! {
                    _ = task_leader.cancelled() => {
                        debug!("leader context cancelled, stopping config watcher");
                        break;
                    }
                    event = stream.next() => match event {
                        Some(Ok(event)) => {
                            if apply_watch_event(&store, event) {
                                if let Some(tx) = synced_tx.take() {
                                    let _ = tx.send(());
                                }
                            }
                        }
                        Some(Err(e)) => warn!(error = %e, "config watcher error, backing off"),
                        None => {
                            warn!("config watcher stream ended");
                            break;
                        }
                    }
                }
            }
        });

        tokio::select! {
            _ = leader.cancelled() => {
                handle.abort();
                Err(Error::Cancelled)
            }
            synced = synced_rx => match synced {
                Ok(()) => Ok(handle),
                Err(_) => Err(Error::Manager {
                    message: "config watcher stopped before initial sync".to_string(),
                }),
            },
        }
    }
}

/// Apply one watch event to the store
///
/// Returns true when the event completes an initial listing.
fn apply_watch_event(store: &ConfigStore, event: Event<ConfigMap>) -> bool {
    match event {
        Event::Apply(config_map) | Event::InitApply(config_map) => {
            match apply_config_map(store, &config_map) {
                Ok(()) => info!("global config updated"),
                Err(e) => warn!(error = %e, "ignoring malformed global config, keeping previous"),
            }
            false
        }
        Event::Delete(_) => {
            warn!("global config deleted, keeping last known config");
            false
        }
        Event::Init => false,
        Event::InitDone => true,
    }
}
