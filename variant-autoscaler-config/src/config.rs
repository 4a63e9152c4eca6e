//! Configuration loading and management.
//!
//! Loading hierarchy: environment variable overrides > ConfigMap-shaped YAML
//! document > compiled defaults. A ConfigMap entry that fails validation is
//! dropped with a logged warning rather than failing the whole load; a
//! ConfigMap missing the mandatory `default` entry is rejected outright,
//! since every resolution falls back to it.

use std::collections::BTreeMap;

use tracing::warn;

use crate::schema::{
    ConfigError, LoopConfig, SaturationConfig, SaturationConfigEntry, SaturationConfigMap,
    DEFAULT_KEY,
};

/// Parses a saturation ConfigMap document (YAML) into a [`SaturationConfigMap`].
///
/// Invalid entries (e.g. a zero threshold) are dropped and logged rather than
/// failing the whole load, except for `default`, which must be valid since
/// every other entry can fall back to it.
pub fn load_saturation_config(yaml: &str) -> Result<SaturationConfigMap, ConfigError> {
    let raw: BTreeMap<String, SaturationConfigEntry> =
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;

    if !raw.contains_key(DEFAULT_KEY) {
        return Err(ConfigError::MissingDefault);
    }

    let mut validated = BTreeMap::new();
    for (key, entry) in raw {
        if let Err(reason) = entry.thresholds.validate() {
            if key == DEFAULT_KEY {
                return Err(ConfigError::Invalid(format!(
                    "default saturation entry is invalid: {reason}"
                )));
            }
            warn!(entry = %key, reason = %reason, "dropping invalid saturation config entry, falling back to default");
            continue;
        }
        validated.insert(key, entry);
    }

    Ok(SaturationConfigMap::from_raw(validated))
}

/// Returns a saturation config containing only the compiled-in default.
pub fn default_saturation_config() -> SaturationConfigMap {
    SaturationConfigMap::with_default_only(SaturationConfig::default())
}

/// Loads a saturation ConfigMap document, falling back to compiled defaults
/// (with a logged warning) if `yaml` is `None` or fails to parse/validate.
pub fn load_saturation_config_or_default(yaml: Option<&str>) -> SaturationConfigMap {
    match yaml {
        None => default_saturation_config(),
        Some(doc) => match load_saturation_config(doc) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(error = %e, "falling back to default saturation config");
                default_saturation_config()
            }
        },
    }
}

/// Parses a loop-config ConfigMap document (YAML) into a [`LoopConfig`].
pub fn load_loop_config(yaml: &str) -> Result<LoopConfig, ConfigError> {
    serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Loads a loop-config document, falling back to the compiled default (with a
/// logged warning) if `yaml` is `None` or fails to parse.
pub fn load_loop_config_or_default(yaml: Option<&str>) -> LoopConfig {
    match yaml {
        None => LoopConfig::default(),
        Some(doc) => match load_loop_config(doc) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(error = %e, "falling back to default loop config");
                LoopConfig::default()
            }
        },
    }
}
