//! Timeout-bound contexts for client operations
//!
//! A [`TimeoutContext`] is a child of either the base token or, once
//! leadership is held, the leader token. Cancelling the parent cancels every
//! context derived from it.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::Error;

/// Timeout for client operations before the multiplier is applied
pub const DEFAULT_CLIENT_OPERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Deadline horizon used when a timeout does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Replace unusable multipliers (negative, NaN, infinite) with 1
pub fn sanitize_multiplier(multiplier: f64) -> f64 {
    if multiplier.is_finite() && multiplier >= 0.0 {
        multiplier
    } else {
        1.0
    }
}

/// Default timeout scaled by `multiplier`, rounded to whole seconds
pub fn operation_timeout(multiplier: f64) -> Duration {
    let seconds = DEFAULT_CLIENT_OPERATION_TIMEOUT.as_secs_f64() * sanitize_multiplier(multiplier);
    Duration::from_secs(seconds.round() as u64)
}

/// Cancellable context with a deadline
#[derive(Debug)]
pub struct TimeoutContext {
    token: CancellationToken,
    timeout: Duration,
    deadline: Instant,
}

impl TimeoutContext {
    /// Derive a context from `parent` that expires after `timeout`
    ///
    /// Timeouts too large to represent get a deadline decades out.
    pub fn new(parent: &CancellationToken, timeout: Duration) -> Self {
        let now = Instant::now();

        Self {
            token: parent.child_token(),
            timeout,
            deadline: now.checked_add(timeout).unwrap_or(now + FAR_FUTURE),
        }
    }

    /// Token cancelled with this context or any of its parents
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Timeout this context was issued with
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Cancel this context without touching its parent
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether this context or a parent was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the context was cancelled or its deadline passed
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || Instant::now() >= self.deadline
    }

    /// Resolves once cancelled or past the deadline
    pub async fn done(&self) {
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = tokio::time::sleep_until(self.deadline) => {}
        }
    }

    /// Run `fut` bounded by this context
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Error> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep_until(self.deadline) => Err(Error::DeadlineExceeded(self.timeout)),
            output = fut => Ok(output),
        }
    }
}
