//! Startup phases shared by the initializer and controller paths

mod config;
mod cri;
mod namespace;

pub use config::{apply_config_map, bootstrap_config_map, load_config};
pub use cri::{cri_kind_from_runtime_version, detect_cri_kind, CRI_KIND_UNKNOWN};
pub use namespace::{detect_namespace, SERVICE_ACCOUNT_NAMESPACE_PATH};
