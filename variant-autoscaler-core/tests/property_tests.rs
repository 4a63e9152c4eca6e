//! Property tests for the decision core's invariants, checked across the
//! input space rather than only at fixed seed points.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use proptest::prelude::*;
use variant_autoscaler_config::SaturationConfig;
use variant_autoscaler_core::analyze::classify;
use variant_autoscaler_core::metrics_source::{escape_label_value, MetricResult, MetricRow, MetricsSource, MetricsSourceConfig, QueryExecutor, QueryTemplate};
use variant_autoscaler_core::planner::calculate_saturation_targets;
use variant_autoscaler_core::{ModelSaturationAnalysis, ReplicaMetrics, VariantReplicaState, VariantSaturationAnalysis};

fn metrics(variant_name: &str, kv: f64, queue: u32) -> ReplicaMetrics {
    ReplicaMetrics {
        pod_name: format!("{variant_name}-0"),
        variant_name: variant_name.to_string(),
        model_id: "m1".to_string(),
        namespace: "prod".to_string(),
        accelerator_name: "A100".to_string(),
        cost: 10.0,
        kv_cache_usage: kv,
        queue_length: queue,
        kv_cache_known: true,
        queue_known: true,
        timestamp: Utc::now(),
    }
}

fn variant_analysis(name: &str, cost: f64, replica_count: u32) -> VariantSaturationAnalysis {
    VariantSaturationAnalysis {
        variant_name: name.to_string(),
        accelerator_name: "A100".to_string(),
        cost,
        replica_count,
        non_saturated_count: replica_count,
        avg_spare_kv: 0.5,
        avg_spare_queue: 3.0,
    }
}

fn analysis_with(should_scale_up: bool, scale_down_safe: bool, variants: &[(&str, f64, u32, u32)]) -> (ModelSaturationAnalysis, HashMap<String, VariantReplicaState>) {
    let mut states = HashMap::new();
    let variant_analyses = variants
        .iter()
        .map(|(name, cost, ready, pending)| {
            states.insert(
                name.to_string(),
                VariantReplicaState { current_replicas: ready + pending, ready_replicas: *ready, desired_replicas: 0 },
            );
            variant_analysis(name, *cost, *ready)
        })
        .collect();

    (
        ModelSaturationAnalysis {
            model_id: "m1".to_string(),
            namespace: "prod".to_string(),
            accelerator_name: "A100".to_string(),
            total_replicas: variants.iter().map(|(_, _, r, _)| r).sum(),
            non_saturated_count: 0,
            avg_spare_kv: 0.0,
            avg_spare_queue: 0.0,
            should_scale_up,
            scale_down_safe,
            variant_analyses,
        },
        states,
    )
}

proptest! {
    /// Law 2: classification is exhaustive and exclusive given fully-known
    /// metrics — saturated iff at least one known field meets its
    /// threshold, non-saturated otherwise. Never both.
    #[test]
    fn classification_is_exclusive(kv in 0.0f64..=1.0, queue in 0u32..20) {
        let config = SaturationConfig::default();
        let m = metrics("v1", kv, queue);
        let saturated = kv >= config.kv_cache_threshold || queue >= config.queue_length_threshold;
        let classification = classify(&m, &config);
        if saturated {
            prop_assert_eq!(classification, variant_autoscaler_core::analyze::Saturation::Saturated);
        } else {
            prop_assert_eq!(classification, variant_autoscaler_core::analyze::Saturation::NonSaturated);
        }
    }

    /// Law 3: within one tick, a group's total ready-replica delta is
    /// bounded to at most one unit of change, in either direction.
    #[test]
    fn increment_bound_is_at_most_one(
        names in prop::collection::vec("[a-z]{1,6}", 2..6),
        scale_up in any::<bool>(),
    ) {
        let variants: Vec<(&str, f64, u32, u32)> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), 10.0 + i as f64, 2u32, 0u32))
            .collect();
        let (analysis, states) = analysis_with(scale_up, !scale_up, &variants);
        let targets = calculate_saturation_targets(&analysis, &states);

        let delta: i64 = targets
            .iter()
            .map(|(name, target)| i64::from(target.target_replicas) - i64::from(states[name].ready_replicas))
            .sum();
        prop_assert!((-1..=1).contains(&delta));
    }

    /// Law 4: a variant with pending replicas is never the scale-up
    /// selection, regardless of how favorable its cost is.
    #[test]
    fn pending_variant_never_selected_for_scale_up(
        cheap_cost in 1.0f64..5.0,
        other_cost in 10.0f64..50.0,
    ) {
        let mut states = HashMap::new();
        states.insert("pending-cheap".to_string(), VariantReplicaState { current_replicas: 3, ready_replicas: 2, desired_replicas: 0 });
        states.insert("ready-expensive".to_string(), VariantReplicaState { current_replicas: 2, ready_replicas: 2, desired_replicas: 0 });

        let analysis = ModelSaturationAnalysis {
            model_id: "m1".to_string(),
            namespace: "prod".to_string(),
            accelerator_name: "A100".to_string(),
            total_replicas: 4,
            non_saturated_count: 0,
            avg_spare_kv: 0.0,
            avg_spare_queue: 0.0,
            should_scale_up: true,
            scale_down_safe: false,
            variant_analyses: vec![
                variant_analysis("pending-cheap", cheap_cost, 2),
                variant_analysis("ready-expensive", other_cost, 2),
            ],
        };

        let targets = calculate_saturation_targets(&analysis, &states);
        prop_assert_eq!(targets["pending-cheap"].target_replicas, 2);
        prop_assert_eq!(targets["ready-expensive"].target_replicas, 3);
    }

    /// Law 5: given identical inputs, repeated calls select the same
    /// variant — no hidden nondeterminism (hash-map iteration order,
    /// float comparison ties, etc.) leaks into the outcome.
    #[test]
    fn tie_break_is_deterministic_across_runs(
        names in prop::collection::vec("[a-z]{1,6}", 2..8),
        scale_up in any::<bool>(),
    ) {
        let variants: Vec<(&str, f64, u32, u32)> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), 10.0, 2u32 + (i as u32 % 2), 0u32))
            .collect();
        let (analysis, states) = analysis_with(scale_up, !scale_up, &variants);

        let first = calculate_saturation_targets(&analysis, &states);
        let second = calculate_saturation_targets(&analysis, &states);
        prop_assert_eq!(first, second);
    }

    /// Law 6: preservation overrides the analysis outcome unconditionally.
    #[test]
    fn preservation_always_wins(
        desired in 1u32..20,
        current in 0u32..20,
        scale_up in any::<bool>(),
    ) {
        prop_assume!(desired != current);
        let mut states = HashMap::new();
        states.insert("v1".to_string(), VariantReplicaState { current_replicas: current, ready_replicas: current, desired_replicas: desired });
        let (analysis, _) = analysis_with(scale_up, !scale_up, &[("v1", 10.0, current, 0)]);
        // Overwrite with the real (non-derived) state carrying `desired`.
        let targets = calculate_saturation_targets(&analysis, &states);
        prop_assert_eq!(targets["v1"].target_replicas, desired);
    }

    /// Law 8: escaping never lets a raw `"` or unmatched `\` reach the
    /// rendered query outside of a properly escaped sequence.
    #[test]
    fn escaping_is_always_safe_to_embed(s in ".*") {
        let escaped = escape_label_value(&s);
        let mut chars = escaped.chars().peekable();
        let mut backslash_run = 0usize;
        while let Some(c) = chars.next() {
            match c {
                '\\' => backslash_run += 1,
                '"' => {
                    // A literal quote must be preceded by an odd number of
                    // backslashes (the escaping backslash itself).
                    prop_assert_eq!(backslash_run % 2, 1, "unescaped quote in {:?}", escaped);
                    backslash_run = 0;
                }
                _ => backslash_run = 0,
            }
        }
        // No dangling trailing backslash run of even... actually any
        // trailing backslash run must be even (each original backslash
        // doubled) since the string has ended with no quote to pair with.
        prop_assert_eq!(backslash_run % 2, 0, "dangling backslash in {:?}", escaped);
    }
}

/// Law 7: when collection fails for a group, the safety-net constructor
/// always yields a decision whose target is a defined, non-null fallback
/// (previous desired if nonzero, else current replicas) — never absent.
#[test]
fn safety_net_always_yields_a_fallback_target() {
    use variant_autoscaler_core::VariantDecision;
    proptest!(|(current in 0u32..50, previous_desired in 0u32..50)| {
        let fallback = if previous_desired != 0 { previous_desired } else { current };
        let decision = VariantDecision::safety_net("v1", "prod", "m1", 10.0, current, fallback, "BackendUnavailable", "down", Utc::now());
        prop_assert!(!decision.metrics_available);
        prop_assert_eq!(decision.target_replicas, fallback);
    });
}

/// Law 9: a cached metrics-source result is only servable within its TTL
/// window; once the window elapses, `get` misses even though `refresh`
/// was never called again.
#[test]
fn cache_freshness_window_is_respected() {
    #[derive(Clone, Default)]
    struct StaticExecutor;

    #[async_trait::async_trait]
    impl QueryExecutor for StaticExecutor {
        async fn execute(&self, _rendered_query: &str) -> variant_autoscaler_core::Result<MetricResult> {
            Ok(MetricResult { rows: vec![MetricRow { pod_name: "p0".to_string(), value: 1.0, timestamp: Utc::now() }] })
        }
    }

    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        let config = MetricsSourceConfig { cache_ttl: Duration::from_millis(30), ..MetricsSourceConfig::default() };
        let source = MetricsSource::new(std::sync::Arc::new(StaticExecutor), config);
        source.register_query(QueryTemplate::new("q", "q{ns=\"{namespace}\"}")).await;

        let mut params = std::collections::BTreeMap::new();
        params.insert("namespace".to_string(), "prod".to_string());

        source.refresh(None, &params).await.unwrap();
        assert!(source.get("q", &params).await.is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(source.get("q", &params).await.is_none());
    });
}
