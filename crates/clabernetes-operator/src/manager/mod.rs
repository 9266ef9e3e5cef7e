//! Process lifecycle controller
//!
//! [`Clabernetes`] owns everything the operator process needs between startup
//! and exit: the signal-bound base token, the leader token once leadership is
//! held, the global config store, and the logging and HTTP collaborators.
//! Only one may be constructed per process, see [`InstanceGuard`].

mod start;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use clabernetes_common::{random_string, ConfigStore, APP_NAME_DEFAULT};
use kube::Client;
use tokio_util::sync::CancellationToken;

use crate::cluster::Cluster;
use crate::context::{operation_timeout, sanitize_multiplier, TimeoutContext};
use crate::http::{HttpManager, Readiness};
use crate::logging::{LogManager, Logger};
use crate::runtime::ClusterRuntime;
use crate::signals::signal_handled_token;
use crate::{Error, LOGGER_NAME};

/// Length of the random suffix on the leader election identity
const IDENTITY_SUFFIX_LENGTH: usize = 8;

/// Process-wide claim on the single [`Clabernetes`] instance
#[derive(Debug)]
pub struct InstanceGuard {
    claimed: AtomicBool,
}

impl InstanceGuard {
    /// Create an unclaimed guard
    pub const fn new() -> Self {
        Self {
            claimed: AtomicBool::new(false),
        }
    }

    /// Claim the guard; fails if it was already claimed
    pub fn claim(&self) -> Result<(), Error> {
        self.claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| Error::DuplicateInstance)
    }
}

impl Default for InstanceGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// The guard used by the operator binary
pub static PROCESS_INSTANCE: InstanceGuard = InstanceGuard::new();

/// Process settings resolved by the entry point
#[derive(Clone, Debug)]
pub struct StartupOptions {
    /// Run the one-shot initializer instead of the controller
    pub initializer: bool,
    /// Level for the base logger
    pub logger_level: String,
    /// Application name used for leases, the config ConfigMap and logging
    pub app_name: String,
    /// Scale applied to the default client operation timeout
    pub timeout_multiplier: f64,
    /// Pod name, used as the leader election identity prefix when set
    pub pod_name: Option<String>,
    /// Pod namespace from the downward API, preferred over every other source
    pub pod_namespace: Option<String>,
}

impl Default for StartupOptions {
    fn default() -> Self {
        Self {
            initializer: false,
            logger_level: "info".to_string(),
            app_name: APP_NAME_DEFAULT.to_string(),
            timeout_multiplier: 1.0,
            pod_name: None,
            pod_namespace: None,
        }
    }
}

/// Collaborators injected into the controller
#[derive(Clone)]
pub struct Collaborators {
    /// Logging backend
    pub logs: Arc<dyn LogManager>,
    /// Alive/ready HTTP endpoints
    pub http: Arc<dyn HttpManager>,
}

/// The operator process
pub struct Clabernetes {
    base: CancellationToken,
    leader: OnceLock<CancellationToken>,
    app_name: String,
    initializer: bool,
    logger: Logger,
    timeout_multiplier: f64,
    identity: String,
    pod_namespace: Option<String>,
    namespace: OnceLock<String>,
    cri_kind: OnceLock<String>,
    client: OnceLock<Client>,
    cluster: OnceLock<Arc<dyn Cluster>>,
    runtime: OnceLock<Arc<dyn ClusterRuntime>>,
    config: Arc<ConfigStore>,
    readiness: Readiness,
    http: Arc<dyn HttpManager>,
    logs: Arc<dyn LogManager>,
}

impl Clabernetes {
    /// Construct the process controller
    ///
    /// Claims `guard` before doing anything else, so a second construction
    /// fails with [`Error::DuplicateInstance`] without touching logging or
    /// signals. Must be called from within a tokio runtime.
    pub fn new(
        options: StartupOptions,
        guard: &InstanceGuard,
        collaborators: Collaborators,
    ) -> Result<Self, Error> {
        guard.claim()?;

        let Collaborators { logs, http } = collaborators;

        logs.init()?;
        let logger = logs.register_logger(LOGGER_NAME, &options.logger_level)?;

        let base = signal_handled_token(logger.clone());

        let app_name = if options.app_name.is_empty() {
            APP_NAME_DEFAULT.to_string()
        } else {
            options.app_name
        };

        let identity_prefix = options
            .pod_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| app_name.clone());
        let identity = format!(
            "{identity_prefix}-{}",
            random_string(IDENTITY_SUFFIX_LENGTH)
        );

        logger.debug(format!(
            "constructed manager, app '{app_name}', identity '{identity}', initializer {}",
            options.initializer
        ));

        Ok(Self {
            base,
            leader: OnceLock::new(),
            app_name,
            initializer: options.initializer,
            logger,
            timeout_multiplier: sanitize_multiplier(options.timeout_multiplier),
            identity,
            pod_namespace: options.pod_namespace.filter(|ns| !ns.is_empty()),
            namespace: OnceLock::new(),
            cri_kind: OnceLock::new(),
            client: OnceLock::new(),
            cluster: OnceLock::new(),
            runtime: OnceLock::new(),
            config: Arc::new(ConfigStore::default()),
            readiness: Readiness::new(),
            http,
            logs,
        })
    }

    /// Base token, cancelled on SIGTERM/SIGINT
    pub fn context(&self) -> &CancellationToken {
        &self.base
    }

    /// Cancel the base token, and with it every derived context
    pub fn cancel_context(&self) {
        self.base.cancel();
    }

    /// Application name
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// The manager's base logger
    pub fn base_logger(&self) -> &Logger {
        &self.logger
    }

    /// Namespace the operator runs in; empty before pre-init
    pub fn namespace(&self) -> &str {
        self.namespace.get().map(String::as_str).unwrap_or_default()
    }

    /// Detected CRI kind; empty before the controller path prepared it
    pub fn cluster_cri_kind(&self) -> &str {
        self.cri_kind.get().map(String::as_str).unwrap_or_default()
    }

    /// Whether this process runs the initializer
    pub fn is_initializer(&self) -> bool {
        self.initializer
    }

    /// Whether startup completed
    pub fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }

    /// Identity used for leader election
    pub fn leader_election_identity(&self) -> &str {
        &self.identity
    }

    /// Kubernetes client, available after pre-init
    pub fn kube_client(&self) -> Option<&Client> {
        self.client.get()
    }

    /// Cluster runtime manager, available once the controller path created it
    pub fn runtime_manager(&self) -> Option<&dyn ClusterRuntime> {
        self.runtime.get().map(|runtime| runtime.as_ref())
    }

    /// Global config store
    pub fn config(&self) -> Arc<ConfigStore> {
        Arc::clone(&self.config)
    }

    /// Context for a single client operation
    ///
    /// Derived from the leader token once leadership is held so that losing
    /// the lease cancels in-flight work; from the base token before that.
    pub fn new_context_with_timeout(&self) -> TimeoutContext {
        let timeout = operation_timeout(self.timeout_multiplier);

        match self.leader.get() {
            Some(leader) => TimeoutContext::new(leader, timeout),
            None => {
                self.logger
                    .debug("leader context not set, deriving timeout context from base context");
                TimeoutContext::new(&self.base, timeout)
            }
        }
    }

    pub(crate) fn set_leader_context(&self, token: CancellationToken) {
        if self.leader.set(token).is_err() {
            self.logger.warn("leader context already set, ignoring");
        }
    }

    /// Stop HTTP (controller only) then flush logs
    ///
    /// HTTP stop failures are logged and do not stop the flush.
    pub async fn shutdown(&self) {
        if !self.initializer {
            if let Err(e) = self.http.stop().await {
                self.logger
                    .warn(format!("failed stopping http manager, continuing shutdown: {e}"));
            }
        }

        self.logs.flush();
    }

    /// Shut down and terminate the process with `code`
    pub async fn exit(&self, code: i32) {
        self.logger.info(format!("exiting with code {code}"));
        self.shutdown().await;
        std::process::exit(code);
    }
}
