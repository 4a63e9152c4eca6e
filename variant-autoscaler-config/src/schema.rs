//! Configuration schema and types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Saturation thresholds for one model scaling domain.
///
/// A domain is classified saturated when either `kv_cache_threshold` or
/// `queue_length_threshold` is reached, and a scale-up is triggered when the
/// average spare capacity across non-saturated replicas falls below the
/// corresponding `*_spare_trigger`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaturationConfig {
    /// KV-cache usage, in `(0, 1]`, above which a replica is saturated.
    #[serde(default = "default_kv_cache_threshold")]
    pub kv_cache_threshold: f64,
    /// Queue length at or above which a replica is saturated.
    #[serde(default = "default_queue_length_threshold")]
    pub queue_length_threshold: u32,
    /// Minimum acceptable average spare KV-cache capacity.
    #[serde(default = "default_kv_spare_trigger")]
    pub kv_spare_trigger: f64,
    /// Minimum acceptable average spare queue capacity.
    #[serde(default = "default_queue_spare_trigger")]
    pub queue_spare_trigger: u32,
}

fn default_kv_cache_threshold() -> f64 {
    0.80
}

fn default_queue_length_threshold() -> u32 {
    5
}

fn default_kv_spare_trigger() -> f64 {
    0.10
}

fn default_queue_spare_trigger() -> u32 {
    3
}

impl Default for SaturationConfig {
    fn default() -> Self {
        Self {
            kv_cache_threshold: default_kv_cache_threshold(),
            queue_length_threshold: default_queue_length_threshold(),
            kv_spare_trigger: default_kv_spare_trigger(),
            queue_spare_trigger: default_queue_spare_trigger(),
        }
    }
}

impl SaturationConfig {
    /// Rejects thresholds and triggers that make the analyzer's classification
    /// or spare-capacity formulas meaningless.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.kv_cache_threshold > 0.0 && self.kv_cache_threshold <= 1.0) {
            return Err(format!(
                "kv_cache_threshold must be in (0, 1], got {}",
                self.kv_cache_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.kv_spare_trigger) {
            return Err(format!(
                "kv_spare_trigger must be in [0, 1], got {}",
                self.kv_spare_trigger
            ));
        }
        Ok(())
    }
}

/// A single entry in the saturation ConfigMap: thresholds plus an optional
/// namespace scope. An entry with `namespace: None` applies to its model
/// across all namespaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaturationConfigEntry {
    /// Namespace this entry is scoped to, or `None` for all namespaces.
    #[serde(default)]
    pub namespace: Option<String>,
    /// The thresholds themselves.
    #[serde(flatten)]
    pub thresholds: SaturationConfig,
}

/// The full saturation ConfigMap: keyed by model ID, with a mandatory
/// `"default"` entry used whenever no model- or namespace-specific entry
/// matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaturationConfigMap {
    #[serde(flatten)]
    entries: BTreeMap<String, SaturationConfigEntry>,
}

/// Key used for the mandatory fallback entry.
pub const DEFAULT_KEY: &str = "default";

impl SaturationConfigMap {
    /// Builds a map containing only the mandatory `default` entry.
    pub fn with_default_only(default: SaturationConfig) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            DEFAULT_KEY.to_string(),
            SaturationConfigEntry {
                namespace: None,
                thresholds: default,
            },
        );
        Self { entries }
    }

    /// Resolves the thresholds that apply to `(model_id, namespace)`.
    ///
    /// Precedence: an entry for `model_id` scoped to this exact `namespace`,
    /// then an entry for `model_id` with no namespace scope, then `default`.
    pub fn resolve(&self, model_id: &str, namespace: &str) -> &SaturationConfig {
        if let Some(entry) = self.entries.get(model_id) {
            if entry.namespace.as_deref() == Some(namespace) {
                return &entry.thresholds;
            }
        }
        if let Some(entry) = self.entries.get(model_id) {
            if entry.namespace.is_none() {
                return &entry.thresholds;
            }
        }
        // A model_id entry scoped to a *different* namespace does not apply;
        // fall through to default.
        &self
            .entries
            .get(DEFAULT_KEY)
            .expect("SaturationConfigMap invariant: default entry always present")
            .thresholds
    }

    /// Returns `true` if a mandatory `default` entry is present.
    pub fn has_default(&self) -> bool {
        self.entries.contains_key(DEFAULT_KEY)
    }

    /// Iterates all entries, including `default`.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &SaturationConfigEntry)> {
        self.entries.iter()
    }

    pub(crate) fn from_raw(entries: BTreeMap<String, SaturationConfigEntry>) -> Self {
        Self { entries }
    }
}

/// Configuration for the optimization loop's tick scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopConfig {
    /// Interval between optimization ticks, in seconds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    30
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

impl LoopConfig {
    /// The configured interval as a [`std::time::Duration`].
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The ConfigMap document could not be parsed as YAML.
    #[error("config parse error: {0}")]
    Parse(String),

    /// A config entry failed validation (e.g. a non-positive threshold).
    #[error("config validation error: {0}")]
    Invalid(String),

    /// Reading the config source failed.
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    /// The saturation ConfigMap lacked its mandatory `default` entry.
    #[error("saturation config is missing the required 'default' entry")]
    MissingDefault,
}
