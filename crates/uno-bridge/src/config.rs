//! Bridge configuration

use crate::defaults::{DEFAULT_CPP_ENV_NAME, DEFAULT_MAX_CACHED_VTABLES, DEFAULT_UNO_ENV_NAME};

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Name of the native environment, used in log output
    pub cpp_env_name: String,
    /// Name of the component environment, used in log output
    pub uno_env_name: String,
    /// Interface types whose vtables are kept in the cache. Vtables for
    /// further types are built per proxy.
    pub max_cached_vtables: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            cpp_env_name: DEFAULT_CPP_ENV_NAME.to_string(),
            uno_env_name: DEFAULT_UNO_ENV_NAME.to_string(),
            max_cached_vtables: DEFAULT_MAX_CACHED_VTABLES,
        }
    }
}
