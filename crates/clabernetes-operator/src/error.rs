//! Error types for the clabernetes operator process

use std::time::Duration;

use thiserror::Error;

/// Errors raised while starting, leading or stopping the operator
#[derive(Debug, Error)]
pub enum Error {
    /// A second manager was constructed in the same process
    #[error("clabernetes instance already created")]
    DuplicateInstance,

    /// Logging could not be initialized or a logger could not be registered
    #[error("logging error: {0}")]
    Logging(String),

    /// A startup phase failed before the runtime manager existed
    #[error("startup error [{phase}]: {message}")]
    Startup {
        /// Phase that failed (pre-init, prepare, ...)
        phase: String,
        /// Description of what failed
        message: String,
    },

    /// The cluster runtime manager could not be created
    #[error("failed creating cluster runtime manager: {message}")]
    Manager {
        /// Description of what failed
        message: String,
    },

    /// HTTP endpoint manager error
    #[error("http manager error: {0}")]
    Http(String),

    /// Leadership was lost while running as the controller
    #[error("lost leadership of lease {lease}")]
    LeadershipLost {
        /// Lease that was lost
        lease: String,
    },

    /// The governing context was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// The operation ran past its timeout
    #[error("operation timed out after {0:?}")]
    DeadlineExceeded(Duration),

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Error from the shared clabernetes crate
    #[error(transparent)]
    Common(#[from] clabernetes_common::Error),
}

impl Error {
    /// Create a startup error for the given phase
    pub fn startup(phase: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Startup {
            phase: phase.into(),
            message: msg.into(),
        }
    }
}
