//! clabernetes operator process: startup phases, leadership and shutdown

#![deny(missing_docs)]

pub mod cluster;
pub mod context;
pub mod error;
pub mod http;
pub mod logging;
pub mod manager;
pub mod runtime;
pub mod signals;
pub mod startup;

pub use error::Error;
pub use manager::{Clabernetes, Collaborators, InstanceGuard, StartupOptions, PROCESS_INSTANCE};

/// Result type alias using the operator Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the manager's base logger
pub const LOGGER_NAME: &str = "clabernetes";

/// Default port for the alive/ready HTTP endpoints
pub const DEFAULT_HTTP_PORT: u16 = 10254;
