//! Leader election using Kubernetes Leases
//!
//! Candidates contend for a coordination.k8s.io/v1 Lease. The holder renews
//! every retry period and gives leadership up if it cannot renew within the
//! renew deadline, well before the lease duration lets another candidate in.
//!
//! # Atomicity
//!
//! Uses resourceVersion for compare-and-swap semantics. If the lease changes
//! between read and write, the update fails with 409 Conflict and the attempt
//! counts as "not acquired".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use serde_json::json;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long a lease is valid after its last renewal
pub const ELECTION_DURATION: Duration = Duration::from_secs(60);

/// How long the holder keeps trying to renew before giving up leadership
pub const ELECTION_RENEW_DEADLINE: Duration = Duration::from_secs(40);

/// Interval between acquire/renew attempts
pub const ELECTION_RETRY_PERIOD: Duration = Duration::from_secs(8);

/// Leader election errors
#[derive(Debug, Error)]
pub enum LeaderElectionError {
    /// Kubernetes API error
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// The lease came back without a resourceVersion so it cannot be updated atomically
    #[error("lease {0} has no resourceVersion")]
    MissingResourceVersion(String),
}

/// Lease timings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeaderElectionConfig {
    /// Lease validity after the last renewal
    pub lease_duration: Duration,
    /// Time the holder may spend failing to renew before stepping down
    pub renew_deadline: Duration,
    /// Interval between attempts
    pub retry_period: Duration,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            lease_duration: ELECTION_DURATION,
            renew_deadline: ELECTION_RENEW_DEADLINE,
            retry_period: ELECTION_RETRY_PERIOD,
        }
    }
}

/// Access to the single Lease an elector contends for
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LeaseClient: Send + Sync {
    /// Fetch the lease, `None` when it does not exist
    async fn get(&self) -> Result<Option<Lease>, LeaderElectionError>;

    /// Create the lease; `false` when another candidate created it first
    async fn create(&self, lease: Lease) -> Result<bool, LeaderElectionError>;

    /// Replace the lease at its resourceVersion; `false` on conflict
    async fn replace(&self, lease: Lease) -> Result<bool, LeaderElectionError>;

    /// Merge-patch the lease
    async fn patch(&self, patch: serde_json::Value) -> Result<(), LeaderElectionError>;
}

/// [`LeaseClient`] backed by the Kubernetes API
pub struct KubeLeaseClient {
    api: Api<Lease>,
    name: String,
}

impl KubeLeaseClient {
    /// Client for lease `namespace/name`
    pub fn new(client: Client, namespace: &str, name: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl LeaseClient for KubeLeaseClient {
    async fn get(&self) -> Result<Option<Lease>, LeaderElectionError> {
        Ok(self.api.get_opt(&self.name).await?)
    }

    async fn create(&self, lease: Lease) -> Result<bool, LeaderElectionError> {
        match self.api.create(&PostParams::default(), &lease).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace(&self, lease: Lease) -> Result<bool, LeaderElectionError> {
        match self
            .api
            .replace(&self.name, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch(&self, patch: serde_json::Value) -> Result<(), LeaderElectionError> {
        self.api
            .patch(&self.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Lease-based leader elector for one candidate identity
pub struct LeaderElector {
    leases: Arc<dyn LeaseClient>,
    lease_name: String,
    identity: String,
    config: LeaderElectionConfig,
    is_leader: AtomicBool,
}

impl LeaderElector {
    /// Create an elector for `identity` contending on the lease behind `leases`
    pub fn new(
        leases: Arc<dyn LeaseClient>,
        lease_name: &str,
        identity: &str,
        config: LeaderElectionConfig,
    ) -> Self {
        Self {
            leases,
            lease_name: lease_name.to_string(),
            identity: identity.to_string(),
            config,
            is_leader: AtomicBool::new(false),
        }
    }

    /// Candidate identity
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Whether this candidate currently holds the lease
    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// Block until leadership is acquired or `cancel` fires
    ///
    /// Returns `None` when cancelled before acquiring. The returned guard keeps
    /// renewing the lease until it is dropped or leadership is lost.
    pub async fn acquire(
        self: Arc<Self>,
        cancel: &CancellationToken,
    ) -> Option<LeaderGuard> {
        info!(
            identity = %self.identity,
            lease = %self.lease_name,
            "Waiting for leadership..."
        );

        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = %self.identity, lease = %self.lease_name, "Leadership acquired");
                    self.is_leader.store(true, Ordering::SeqCst);
                    return Some(self.create_guard());
                }
                Ok(false) => {
                    debug!(
                        identity = %self.identity,
                        retry_secs = self.config.retry_period.as_secs(),
                        "Lease held by another, waiting..."
                    );
                }
                Err(e) => {
                    warn!(
                        identity = %self.identity,
                        error = %e,
                        retry_secs = self.config.retry_period.as_secs(),
                        "Failed to acquire lease, retrying..."
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(identity = %self.identity, "Stopped waiting for leadership");
                    return None;
                }
                _ = tokio::time::sleep(self.config.retry_period) => {}
            }
        }
    }

    fn create_guard(self: &Arc<Self>) -> LeaderGuard {
        let (lost_tx, lost_rx) = oneshot::channel();
        let elector = Arc::clone(self);
        let renewal_task = tokio::spawn(async move {
            elector.renewal_loop(lost_tx).await;
        });

        LeaderGuard {
            elector: Arc::clone(self),
            renewal_task,
            lost_rx: Some(lost_rx),
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, LeaderElectionError> {
        let now = Utc::now();

        let Some(existing) = self.leases.get().await? else {
            return self.create_lease(now).await;
        };

        let spec = existing.spec.as_ref();
        if spec.and_then(|s| s.holder_identity.as_ref()) == Some(&self.identity) {
            return self.write_lease(&existing, now, false).await;
        }

        if lease_expired(spec, now) {
            return self.write_lease(&existing, now, true).await;
        }

        Ok(false)
    }

    fn lease_spec(&self, now: DateTime<Utc>, transitions: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: Some(self.config.lease_duration.as_secs() as i32),
            acquire_time: Some(MicroTime(now)),
            renew_time: Some(MicroTime(now)),
            lease_transitions: Some(transitions),
            ..Default::default()
        }
    }

    async fn create_lease(&self, now: DateTime<Utc>) -> Result<bool, LeaderElectionError> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                ..Default::default()
            },
            spec: Some(self.lease_spec(now, 0)),
        };

        let created = self.leases.create(lease).await?;
        if created {
            info!(identity = %self.identity, lease = %self.lease_name, "Created new lease");
        } else {
            debug!(identity = %self.identity, "Lease creation conflict, will retry");
        }
        Ok(created)
    }

    /// Renew a lease we hold, or take over an expired one
    async fn write_lease(
        &self,
        existing: &Lease,
        now: DateTime<Utc>,
        take_over: bool,
    ) -> Result<bool, LeaderElectionError> {
        if existing.metadata.resource_version.is_none() {
            return Err(LeaderElectionError::MissingResourceVersion(
                self.lease_name.clone(),
            ));
        }

        let mut updated = existing.clone();
        if take_over {
            let transitions = existing
                .spec
                .as_ref()
                .and_then(|s| s.lease_transitions)
                .unwrap_or(0);
            updated.spec = Some(self.lease_spec(now, transitions + 1));
        } else if let Some(spec) = updated.spec.as_mut() {
            spec.renew_time = Some(MicroTime(now));
            spec.lease_duration_seconds = Some(self.config.lease_duration.as_secs() as i32);
        }

        let written = self.leases.replace(updated).await?;
        match (written, take_over) {
            (true, true) => {
                info!(identity = %self.identity, lease = %self.lease_name, "Took over expired lease")
            }
            (true, false) => debug!(identity = %self.identity, "Lease renewed"),
            (false, _) => debug!(identity = %self.identity, take_over, "Lease write conflict"),
        }
        Ok(written)
    }

    async fn renewal_loop(&self, lost_tx: oneshot::Sender<()>) {
        let mut last_renewed = Instant::now();

        loop {
            tokio::time::sleep(self.config.retry_period).await;

            let attempt = self.try_acquire_or_renew().await;
            match renewal_step(&attempt, last_renewed.elapsed(), self.config.renew_deadline) {
                Renewal::Renewed => last_renewed = Instant::now(),
                Renewal::Retry => {
                    if let Err(e) = &attempt {
                        warn!(identity = %self.identity, error = %e, "Failed to renew lease, retrying...");
                    }
                }
                Renewal::GiveUp => {
                    match &attempt {
                        Err(e) => warn!(
                            identity = %self.identity,
                            error = %e,
                            deadline_secs = self.config.renew_deadline.as_secs(),
                            "Renew deadline exceeded"
                        ),
                        Ok(_) => warn!(identity = %self.identity, "Lease taken by another candidate"),
                    }
                    break;
                }
            }
        }

        warn!(identity = %self.identity, lease = %self.lease_name, "Leadership lost");
        self.is_leader.store(false, Ordering::SeqCst);
        let _ = lost_tx.send(());
    }

    /// Clear the holder so another candidate can take over without waiting for expiry
    async fn release_lease(&self) -> Result<(), LeaderElectionError> {
        let Some(lease) = self.leases.get().await? else {
            debug!(identity = %self.identity, "Lease not found, nothing to release");
            return Ok(());
        };

        let holder = lease.spec.as_ref().and_then(|s| s.holder_identity.as_ref());
        if holder != Some(&self.identity) {
            debug!(identity = %self.identity, "Not the lease holder, nothing to release");
            return Ok(());
        }

        let past = Utc::now() - chrono::Duration::seconds(self.config.lease_duration.as_secs() as i64);
        let patch = json!({
            "spec": {
                "holderIdentity": null,
                "renewTime": MicroTime(past),
            }
        });

        self.leases.patch(patch).await?;

        self.is_leader.store(false, Ordering::SeqCst);
        info!(identity = %self.identity, lease = %self.lease_name, "Lease released");
        Ok(())
    }
}

/// What the holder does after a renewal attempt
#[derive(Debug, PartialEq, Eq)]
enum Renewal {
    Renewed,
    Retry,
    GiveUp,
}

/// Errors are tolerated until `renew_deadline` has passed since the last
/// successful renewal; losing the lease to another candidate ends leadership
/// at once.
fn renewal_step(
    attempt: &Result<bool, LeaderElectionError>,
    since_renewal: Duration,
    renew_deadline: Duration,
) -> Renewal {
    match attempt {
        Ok(true) => Renewal::Renewed,
        Ok(false) => Renewal::GiveUp,
        Err(_) if since_renewal < renew_deadline => Renewal::Retry,
        Err(_) => Renewal::GiveUp,
    }
}

/// Whether a lease can be taken over at `now`
///
/// A lease without a holder, renew time or duration is treated as expired.
pub fn lease_expired(spec: Option<&LeaseSpec>, now: DateTime<Utc>) -> bool {
    let Some(spec) = spec else {
        return true;
    };
    if spec.holder_identity.as_deref().map_or(true, str::is_empty) {
        return true;
    }

    match (spec.renew_time.as_ref(), spec.lease_duration_seconds) {
        (Some(renewed), Some(duration)) => {
            now > renewed.0 + chrono::Duration::seconds(i64::from(duration))
        }
        _ => true,
    }
}

/// Guard that maintains leadership
///
/// While this guard exists the elector renews the lease in the background.
/// The renewal task is aborted when the guard is dropped.
pub struct LeaderGuard {
    elector: Arc<LeaderElector>,
    renewal_task: JoinHandle<()>,
    lost_rx: Option<oneshot::Receiver<()>>,
}

impl LeaderGuard {
    /// Wait until leadership is lost
    pub async fn lost(&mut self) {
        if let Some(rx) = self.lost_rx.take() {
            let _ = rx.await;
        }
    }

    /// Stop renewing and hand the lease back
    pub async fn release(self) -> Result<(), LeaderElectionError> {
        self.renewal_task.abort();
        self.elector.release_lease().await
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.elector.is_leader.store(false, Ordering::SeqCst);
        self.renewal_task.abort();
        debug!(identity = %self.elector.identity, "Leader guard dropped");
    }
}
