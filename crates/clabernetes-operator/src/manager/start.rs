//! Startup sequencing for the initializer and controller paths

use std::sync::Arc;

use clabernetes_common::leader_election::{LeaderElectionConfig, LeaderElector};
use kube::Client;

use super::Clabernetes;
use crate::cluster::{Cluster, KubeCluster};
use crate::startup::detect_namespace;
use crate::{Error, VERSION};

impl Clabernetes {
    /// Run the process until it should exit
    ///
    /// The initializer path returns once the global config is bootstrapped.
    /// The controller path returns `Ok` when the base token is cancelled and
    /// [`Error::LeadershipLost`] when the lease is lost.
    pub async fn start(&self) -> Result<(), Error> {
        self.pre_init().await?;
        self.run().await
    }

    /// Everything after the cluster connection is in place
    pub(crate) async fn run(&self) -> Result<(), Error> {
        if self.initializer {
            return self.start_init_leader_election().await;
        }

        self.prepare().await?;

        let manager = self.cluster()?.new_manager(&self.app_name, self.namespace()).await?;
        self.logger.info(format!(
            "cluster runtime manager created, api server {}",
            manager.server_version()
        ));
        let _ = self.runtime.set(manager);

        self.http.start(self.readiness.clone()).await?;

        self.start_leader_election().await
    }

    async fn pre_init(&self) -> Result<(), Error> {
        self.logger.info(format!(
            "starting clabernetes {VERSION}, initializer {}",
            self.initializer
        ));

        let kube_config = kube::Config::infer()
            .await
            .map_err(|e| Error::startup("pre-init", format!("failed loading kubeconfig: {e}")))?;

        let namespace = detect_namespace(
            self.pod_namespace.as_deref(),
            &kube_config.default_namespace,
        );
        let client = Client::try_from(kube_config)?;
        let _ = self.client.set(client.clone());

        self.connect(namespace, Arc::new(KubeCluster::new(client)));
        Ok(())
    }

    pub(crate) fn connect(&self, namespace: String, cluster: Arc<dyn Cluster>) {
        self.logger.debug(format!("running in namespace '{namespace}'"));
        let _ = self.namespace.set(namespace);
        let _ = self.cluster.set(cluster);
    }

    async fn prepare(&self) -> Result<(), Error> {
        let cluster = self.cluster()?;

        let ctx = self.new_context_with_timeout();
        ctx.run(cluster.load_config(self.namespace(), &self.app_name, Arc::clone(&self.config)))
            .await??;

        let override_kind = self.config.image_pull_cri_kind_override();
        let ctx = self.new_context_with_timeout();
        let cri_kind = ctx.run(cluster.detect_cri_kind(&override_kind)).await?;
        self.logger.info(format!("cluster CRI kind '{cri_kind}'"));
        let _ = self.cri_kind.set(cri_kind);

        Ok(())
    }

    fn elector(&self, lease: &str) -> Result<Arc<LeaderElector>, Error> {
        let leases = self.cluster()?.lease_client(self.namespace(), lease);
        Ok(Arc::new(LeaderElector::new(
            leases,
            lease,
            &self.identity,
            LeaderElectionConfig::default(),
        )))
    }

    async fn start_init_leader_election(&self) -> Result<(), Error> {
        let lease = format!("{}-init", self.app_name);
        let elector = self.elector(&lease)?;

        let Some(guard) = elector.acquire(&self.base).await else {
            self.logger
                .info("base context cancelled before acquiring init leadership");
            return Err(Error::Cancelled);
        };

        self.set_leader_context(self.base.child_token());
        self.logger.info(format!("acquired init lease '{lease}'"));

        let ctx = self.new_context_with_timeout();
        let bootstrapped = ctx
            .run(self.cluster()?.bootstrap_config(self.namespace(), &self.app_name))
            .await;

        if let Err(e) = guard.release().await {
            self.logger
                .warn(format!("failed releasing init lease '{lease}': {e}"));
        }

        if bootstrapped?? {
            self.logger.info("global config bootstrapped");
        }
        self.logger.info("initialization complete");

        Ok(())
    }

    async fn start_leader_election(&self) -> Result<(), Error> {
        let lease = self.app_name.clone();
        let elector = self.elector(&lease)?;

        let Some(mut guard) = elector.acquire(&self.base).await else {
            self.logger
                .info("base context cancelled before acquiring leadership");
            return Ok(());
        };

        let leader = self.base.child_token();
        self.set_leader_context(leader.clone());
        self.logger.info(format!("acquired lease '{lease}'"));

        let runtime = self.runtime.get().ok_or_else(|| Error::Manager {
            message: "runtime manager not created".to_string(),
        })?;
        let _watcher = runtime.start(leader.clone(), Arc::clone(&self.config)).await?;

        self.readiness.set_ready();
        self.logger.info("startup complete, ready");

        let lost = tokio::select! {
            _ = guard.lost() => true,
            _ = self.base.cancelled() => false,
        };

        if lost {
            leader.cancel();
            self.logger.critical(format!("lost lease '{lease}'"));
            return Err(Error::LeadershipLost { lease });
        }

        self.logger.info("base context cancelled, releasing lease");
        if let Err(e) = guard.release().await {
            self.logger.warn(format!("failed releasing lease '{lease}': {e}"));
        }

        Ok(())
    }

    fn cluster(&self) -> Result<&Arc<dyn Cluster>, Error> {
        self.cluster
            .get()
            .ok_or_else(|| Error::startup("pre-init", "cluster connection not initialized"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use clabernetes_common::leader_election::{LeaderElectionError, LeaseClient};
    use k8s_openapi::api::coordination::v1::Lease;
    use mockall::{mock, Sequence};
    use parking_lot::Mutex;
    use tracing::level_filters::LevelFilter;

    use super::*;
    use crate::cluster::MockCluster;
    use crate::http::{MockHttpManager, Readiness};
    use crate::logging::{Logger, MockLogManager};
    use crate::manager::{Collaborators, InstanceGuard, StartupOptions};
    use crate::runtime::{ClusterRuntime, MockClusterRuntime};

    // LeaseClient's generated mock only exists in clabernetes-common's own tests
    mock! {
        pub Leases {}

        #[async_trait]
        impl LeaseClient for Leases {
            async fn get(&self) -> Result<Option<Lease>, LeaderElectionError>;
            async fn create(&self, lease: Lease) -> Result<bool, LeaderElectionError>;
            async fn replace(&self, lease: Lease) -> Result<bool, LeaderElectionError>;
            async fn patch(&self, patch: serde_json::Value) -> Result<(), LeaderElectionError>;
        }
    }

    fn quiet_logs() -> MockLogManager {
        let mut logs = MockLogManager::new();
        logs.expect_init().returning(|| Ok(()));
        logs.expect_register_logger()
            .returning(|name, _| Ok(Logger::new(name, LevelFilter::OFF)));
        logs.expect_flush().returning(|| ());
        logs
    }

    fn clabernetes(options: StartupOptions, http: MockHttpManager) -> Clabernetes {
        Clabernetes::new(
            options,
            &InstanceGuard::new(),
            Collaborators {
                logs: Arc::new(quiet_logs()),
                http: Arc::new(http),
            },
        )
        .unwrap()
    }

    /// Leases where nobody holds the lease yet, so the first create wins
    fn open_leases(acquired: Arc<AtomicBool>) -> Arc<dyn LeaseClient> {
        let mut leases = MockLeases::new();
        leases.expect_get().returning(|| Ok(None));
        leases.expect_create().times(1).returning(move |_| {
            acquired.store(true, Ordering::SeqCst);
            Ok(true)
        });
        leases.expect_replace().never();
        Arc::new(leases)
    }

    /// Run the controller path and cancel the base context once it reports ready
    async fn run_until_ready(clabernetes: &Clabernetes) -> Result<(), Error> {
        let (result, ()) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(clabernetes.run(), async {
                while !clabernetes.is_ready() {
                    tokio::task::yield_now().await;
                }
                clabernetes.cancel_context();
            })
        })
        .await
        .expect("controller path finished");
        result
    }

    #[tokio::test]
    async fn controller_creates_manager_then_serves_http_then_elects() {
        let mut seq = Sequence::new();
        let acquired = Arc::new(AtomicBool::new(false));
        let served: Arc<Mutex<Option<Readiness>>> = Arc::default();

        let mut runtime = MockClusterRuntime::new();
        runtime
            .expect_server_version()
            .return_const("1.32".to_string());
        {
            let acquired = Arc::clone(&acquired);
            let served = Arc::clone(&served);
            runtime.expect_start().times(1).returning(move |leader, _| {
                assert!(acquired.load(Ordering::SeqCst), "runtime started before leadership");
                assert!(!leader.is_cancelled());
                let readiness = served.lock().clone();
                assert!(
                    readiness.is_some_and(|r| !r.is_ready()),
                    "ready before the initial sync"
                );
                Ok(tokio::spawn(async {}))
            });
        }
        let runtime: Arc<dyn ClusterRuntime> = Arc::new(runtime);
        let leases = open_leases(Arc::clone(&acquired));

        let mut cluster = MockCluster::new();
        cluster
            .expect_load_config()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        cluster
            .expect_detect_cri_kind()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| "containerd".to_string());
        cluster
            .expect_new_manager()
            .withf(|app_name, namespace| app_name == "clabernetes" && namespace == "c9s")
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_, _| Ok(Arc::clone(&runtime)));

        let mut http = MockHttpManager::new();
        {
            let served = Arc::clone(&served);
            http.expect_start()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |readiness| {
                    *served.lock() = Some(readiness);
                    Ok(())
                });
        }

        cluster
            .expect_lease_client()
            .withf(|namespace, lease| namespace == "c9s" && lease == "clabernetes")
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_, _| Arc::clone(&leases));

        let clabernetes = clabernetes(StartupOptions::default(), http);
        clabernetes.connect("c9s".to_string(), Arc::new(cluster));

        assert!(run_until_ready(&clabernetes).await.is_ok());
        assert!(clabernetes.is_ready());
        assert_eq!(clabernetes.cluster_cri_kind(), "containerd");
        assert_eq!(
            clabernetes.runtime_manager().map(|r| r.server_version()),
            Some("1.32".to_string())
        );
    }

    #[tokio::test]
    async fn failed_initial_sync_never_reports_ready() {
        let acquired = Arc::new(AtomicBool::new(false));

        let mut runtime = MockClusterRuntime::new();
        runtime
            .expect_server_version()
            .return_const("1.32".to_string());
        runtime.expect_start().times(1).returning(|_, _| {
            Err(Error::Manager {
                message: "config watcher stopped before initial sync".to_string(),
            })
        });
        let runtime: Arc<dyn ClusterRuntime> = Arc::new(runtime);
        let leases = open_leases(acquired);

        let mut cluster = MockCluster::new();
        cluster.expect_load_config().returning(|_, _, _| Ok(()));
        cluster
            .expect_detect_cri_kind()
            .returning(|_| "containerd".to_string());
        cluster
            .expect_new_manager()
            .returning(move |_, _| Ok(Arc::clone(&runtime)));
        cluster
            .expect_lease_client()
            .returning(move |_, _| Arc::clone(&leases));

        let mut http = MockHttpManager::new();
        http.expect_start().times(1).returning(|_| Ok(()));

        let clabernetes = clabernetes(StartupOptions::default(), http);
        clabernetes.connect("c9s".to_string(), Arc::new(cluster));

        let result = clabernetes.run().await;

        assert!(matches!(result, Err(Error::Manager { .. })));
        assert!(!clabernetes.is_ready());
    }

    #[tokio::test]
    async fn manager_failure_stops_before_http() {
        let mut cluster = MockCluster::new();
        cluster.expect_load_config().returning(|_, _, _| Ok(()));
        cluster
            .expect_detect_cri_kind()
            .returning(|_| "containerd".to_string());
        cluster.expect_new_manager().times(1).returning(|_, _| {
            Err(Error::Manager {
                message: "api server not reachable".to_string(),
            })
        });
        cluster.expect_lease_client().never();

        let mut http = MockHttpManager::new();
        http.expect_start().never();

        let clabernetes = clabernetes(StartupOptions::default(), http);
        clabernetes.connect("c9s".to_string(), Arc::new(cluster));

        assert!(matches!(
            clabernetes.run().await,
            Err(Error::Manager { .. })
        ));
        assert!(clabernetes.runtime_manager().is_none());
    }

    #[tokio::test]
    async fn initializer_bootstraps_under_init_lease_without_http() {
        let mut seq = Sequence::new();
        let acquired = Arc::new(AtomicBool::new(false));
        let leases = open_leases(Arc::clone(&acquired));

        let mut cluster = MockCluster::new();
        cluster.expect_load_config().never();
        cluster.expect_detect_cri_kind().never();
        cluster.expect_new_manager().never();
        cluster
            .expect_lease_client()
            .withf(|namespace, lease| namespace == "c9s" && lease == "clabernetes-init")
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_, _| Arc::clone(&leases));
        cluster
            .expect_bootstrap_config()
            .withf(|namespace, app_name| namespace == "c9s" && app_name == "clabernetes")
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_, _| {
                assert!(acquired.load(Ordering::SeqCst), "bootstrapped without the init lease");
                Ok(true)
            });

        let mut http = MockHttpManager::new();
        http.expect_start().never();

        let options = StartupOptions {
            initializer: true,
            ..Default::default()
        };
        let clabernetes = clabernetes(options, http);
        clabernetes.connect("c9s".to_string(), Arc::new(cluster));

        assert!(clabernetes.run().await.is_ok());
        assert!(!clabernetes.is_ready());
    }

    #[tokio::test]
    async fn initializer_cancelled_before_lease_skips_bootstrap() {
        let mut leases = MockLeases::new();
        leases.expect_get().returning(|| Ok(None));
        // another initializer created the lease first
        leases.expect_create().returning(|_| Ok(false));
        let leases: Arc<dyn LeaseClient> = Arc::new(leases);

        let mut cluster = MockCluster::new();
        cluster
            .expect_lease_client()
            .returning(move |_, _| Arc::clone(&leases));
        cluster.expect_bootstrap_config().never();

        let mut http = MockHttpManager::new();
        http.expect_start().never();

        let options = StartupOptions {
            initializer: true,
            ..Default::default()
        };
        let clabernetes = clabernetes(options, http);
        clabernetes.connect("c9s".to_string(), Arc::new(cluster));
        clabernetes.cancel_context();

        assert!(matches!(clabernetes.run().await, Err(Error::Cancelled)));
    }
}
