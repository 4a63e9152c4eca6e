// Integration tests verifying saturation and loop config loading.

use variant_autoscaler_config::{
    load_loop_config, load_saturation_config, load_saturation_config_or_default, ConfigError,
    DEFAULT_KEY,
};

#[test]
fn loads_default_only_document() {
    let yaml = r#"
default:
  kvCacheThreshold: 0.8
  queueLengthThreshold: 5
  kvSpareTrigger: 0.1
  queueSpareTrigger: 3
"#;
    let cfg = load_saturation_config(yaml).expect("should parse");
    assert!(cfg.has_default());
    let resolved = cfg.resolve("unknown-model", "prod");
    assert_eq!(resolved.kv_cache_threshold, 0.8);
}

#[test]
fn per_model_override_wins_over_default() {
    let yaml = r#"
default:
  kvCacheThreshold: 0.8
  queueLengthThreshold: 5
  kvSpareTrigger: 0.1
  queueSpareTrigger: 3
llama-70b:
  namespace: prod
  kvCacheThreshold: 0.9
  queueLengthThreshold: 8
  kvSpareTrigger: 0.05
  queueSpareTrigger: 2
"#;
    let cfg = load_saturation_config(yaml).expect("should parse");
    let resolved = cfg.resolve("llama-70b", "prod");
    assert_eq!(resolved.kv_cache_threshold, 0.9);

    // Different namespace: the scoped override does not apply, falls back to default.
    let resolved_other_ns = cfg.resolve("llama-70b", "staging");
    assert_eq!(resolved_other_ns.kv_cache_threshold, 0.8);
}

#[test]
fn namespace_unscoped_override_applies_everywhere() {
    let yaml = r#"
default:
  kvCacheThreshold: 0.8
mistral-7b:
  kvCacheThreshold: 0.95
"#;
    let cfg = load_saturation_config(yaml).expect("should parse");
    assert_eq!(cfg.resolve("mistral-7b", "prod").kv_cache_threshold, 0.95);
    assert_eq!(cfg.resolve("mistral-7b", "staging").kv_cache_threshold, 0.95);
}

#[test]
fn missing_default_entry_is_rejected() {
    let yaml = r#"
llama-70b:
  kvCacheThreshold: 0.9
"#;
    let err = load_saturation_config(yaml).unwrap_err();
    assert!(matches!(err, ConfigError::MissingDefault));
}

#[test]
fn invalid_non_default_entry_is_dropped_not_fatal() {
    let yaml = r#"
default:
  kvCacheThreshold: 0.8
broken-model:
  kvCacheThreshold: 0.0
"#;
    let cfg = load_saturation_config(yaml).expect("default entry is valid, load succeeds");
    // broken-model dropped; resolution falls through to default.
    assert_eq!(cfg.resolve("broken-model", "prod").kv_cache_threshold, 0.8);
    assert!(cfg.iter().any(|(k, _)| k == DEFAULT_KEY));
    assert!(!cfg.iter().any(|(k, _)| k == "broken-model"));
}

#[test]
fn out_of_range_kv_spare_trigger_entry_is_dropped_not_fatal() {
    let yaml = r#"
default:
  kvCacheThreshold: 0.8
broken-model:
  kvSpareTrigger: 1.5
"#;
    let cfg = load_saturation_config(yaml).expect("default entry is valid, load succeeds");
    assert_eq!(cfg.resolve("broken-model", "prod").kv_spare_trigger, 0.10);
    assert!(!cfg.iter().any(|(k, _)| k == "broken-model"));
}

#[test]
fn invalid_default_entry_is_fatal() {
    let yaml = r#"
default:
  kvCacheThreshold: -1.0
"#;
    let err = load_saturation_config(yaml).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn malformed_yaml_falls_back_to_default_via_or_default_helper() {
    let cfg = load_saturation_config_or_default(Some("not: [valid yaml"));
    assert_eq!(cfg.resolve("anything", "anywhere").kv_cache_threshold, 0.8);
}

#[test]
fn loop_config_parses_interval() {
    let yaml = "intervalSecs: 45\n";
    let cfg = load_loop_config(yaml).expect("should parse");
    assert_eq!(cfg.interval_secs, 45);
    assert_eq!(cfg.interval(), std::time::Duration::from_secs(45));
}

#[test]
fn loop_config_defaults_when_absent() {
    let cfg = load_loop_config("{}").expect("empty doc uses defaults");
    assert_eq!(cfg.interval_secs, 30);
}
