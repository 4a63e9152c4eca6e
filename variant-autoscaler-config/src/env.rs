//! Environment variable overrides.
//!
//! The controller reads a small, fixed set of environment variables to
//! locate its ConfigMaps and to scope itself to one logical instance when
//! several cores share a cluster (see [`ControllerEnv`]).

use std::env;

const CONFIG_MAP_NAME_VAR: &str = "CONFIG_MAP_NAME";
const SATURATION_CONFIG_MAP_NAME_VAR: &str = "SATURATION_CONFIG_MAP_NAME";
const POD_NAMESPACE_VAR: &str = "POD_NAMESPACE";
const CONTROLLER_INSTANCE_VAR: &str = "CONTROLLER_INSTANCE";

const DEFAULT_CONFIG_MAP_NAME: &str = "variant-autoscaler-config";
const DEFAULT_SATURATION_CONFIG_MAP_NAME: &str = "variant-autoscaler-saturation-config";
const DEFAULT_POD_NAMESPACE: &str = "default";

/// Environment-derived identity and ConfigMap locations for one controller
/// instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerEnv {
    /// Namespace the controller itself runs in (where its ConfigMaps live).
    pub pod_namespace: String,
    /// Name of the loop-interval ConfigMap.
    pub config_map_name: String,
    /// Name of the saturation-thresholds ConfigMap.
    pub saturation_config_map_name: String,
    /// When set, restricts variant enumeration to this controller-instance
    /// label value, allowing multiple cores to coexist in one cluster.
    pub controller_instance: Option<String>,
}

impl Default for ControllerEnv {
    fn default() -> Self {
        Self {
            pod_namespace: DEFAULT_POD_NAMESPACE.to_string(),
            config_map_name: DEFAULT_CONFIG_MAP_NAME.to_string(),
            saturation_config_map_name: DEFAULT_SATURATION_CONFIG_MAP_NAME.to_string(),
            controller_instance: None,
        }
    }
}

impl ControllerEnv {
    /// Reads `ControllerEnv` from the process environment, falling back to
    /// the documented defaults for any variable that is unset.
    pub fn from_process_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = env::var(POD_NAMESPACE_VAR) {
            cfg.pod_namespace = v;
        }
        if let Ok(v) = env::var(CONFIG_MAP_NAME_VAR) {
            cfg.config_map_name = v;
        }
        if let Ok(v) = env::var(SATURATION_CONFIG_MAP_NAME_VAR) {
            cfg.saturation_config_map_name = v;
        }
        if let Ok(v) = env::var(CONTROLLER_INSTANCE_VAR) {
            cfg.controller_instance = Some(v);
        }
        cfg
    }
}
