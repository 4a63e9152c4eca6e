//! Configuration loading for the variant autoscaler.
//!
//! Two documents drive the optimization loop: a saturation-thresholds
//! ConfigMap (per model, with a mandatory `default` entry) and a
//! loop-interval ConfigMap. Both are YAML, loaded with a strict
//! precedence — environment variable overrides first, then the ConfigMap
//! document, then compiled-in defaults — and an invalid entry never aborts
//! startup: it is dropped (or substituted) with a logged warning.

mod config;
mod env;
mod schema;

pub use config::{
    default_saturation_config, load_loop_config, load_loop_config_or_default,
    load_saturation_config, load_saturation_config_or_default,
};
pub use env::ControllerEnv;
pub use schema::{
    ConfigError, LoopConfig, SaturationConfig, SaturationConfigEntry, SaturationConfigMap,
    DEFAULT_KEY,
};
