//! Common types for clabernetes: configuration, identifiers, errors and leader election

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod leader_election;
pub mod random;

pub use config::{ConfigStore, GlobalConfig};
pub use error::Error;
pub use random::random_string;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default application name, used for lease, ConfigMap and logger names
pub const APP_NAME_DEFAULT: &str = "clabernetes";

/// Environment variable overriding the application name
pub const APP_NAME_ENV: &str = "APP_NAME";

/// Environment variable overriding the manager logger level
pub const MANAGER_LOGGER_LEVEL_ENV: &str = "MANAGER_LOGGER_LEVEL";

/// Environment variable scaling the default client operation timeout
pub const CLIENT_OPERATION_TIMEOUT_MULTIPLIER_ENV: &str = "CLIENT_OPERATION_TIMEOUT_MULTIPLIER";

/// Suffix appended to the app name to build the global config ConfigMap name
pub const CONFIG_MAP_SUFFIX: &str = "config";

/// Naming mode that keeps the topology name as a prefix of generated resources
pub const NAMING_MODE_PREFIXED: &str = "prefixed";

/// Naming mode that drops the topology prefix from generated resources
pub const NAMING_MODE_NON_PREFIXED: &str = "non-prefixed";

/// Exit code for graceful termination
pub const EXIT_CODE_SUCCESS: i32 = 0;

/// Exit code for fatal startup or leadership errors
pub const EXIT_CODE_ERROR: i32 = 1;

/// Name of the global config ConfigMap for an application
pub fn config_map_name(app_name: &str) -> String {
    format!("{app_name}-{CONFIG_MAP_SUFFIX}")
}
