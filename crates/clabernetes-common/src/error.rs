//! Error types shared by the clabernetes crates
//!
//! Variants carry the context needed to act on them (the config key that
//! failed to parse, the lease being contended) rather than bare strings.

use thiserror::Error;

use crate::leader_election::LeaderElectionError;

/// Main error type for clabernetes common operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A global config value could not be decoded
    #[error("config error for key '{key}': {message}")]
    Config {
        /// ConfigMap key holding the bad value
        key: String,
        /// Description of what's invalid
        message: String,
    },

    /// Leader election failed
    #[error(transparent)]
    LeaderElection(#[from] LeaderElectionError),

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a config error for the given ConfigMap key
    pub fn config(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Whether the error came back from the API server as a 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube { source: kube::Error::Api(e) } if e.code == 404)
    }
}
