//! Saturation classification and group-level analysis.
//!
//! This is the read-only half of the saturation analyzer: it turns a set of
//! [`ReplicaMetrics`] for one (model, namespace, accelerator) group into a
//! [`ModelSaturationAnalysis`], without yet deciding which variant absorbs
//! a scale-up or scale-down. That selection is [`crate::planner`]'s job,
//! consuming this module's output.

use std::collections::HashMap;

use tracing::{debug, instrument};
use variant_autoscaler_config::SaturationConfig;

use crate::types::{ModelSaturationAnalysis, ReplicaMetrics, VariantSaturationAnalysis};

/// A replica's saturation classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Saturation {
    /// Below both thresholds on fields known to be fresh.
    NonSaturated,
    /// At or above either threshold.
    Saturated,
    /// Neither KV-cache nor queue-length is known for this replica (see
    /// `ReplicaMetrics::is_fully_known`) but at least one of the two was
    /// present and below threshold, without the other to corroborate it;
    /// excluded from spare-capacity averages entirely.
    Unknown,
}

/// Classifies one replica: non-saturated iff KV-cache usage is below
/// threshold AND queue length is below threshold.
///
/// A replica with only partial data (see `ReplicaMetrics::kv_cache_known`
/// and `queue_known`) is saturated if its one known value already meets or
/// exceeds its threshold (no need to wait for the other field to confirm
/// trouble); otherwise it is `Unknown` and excluded from every average.
pub fn classify(metrics: &ReplicaMetrics, config: &SaturationConfig) -> Saturation {
    let kv_saturated = metrics.kv_cache_known && metrics.kv_cache_usage >= config.kv_cache_threshold;
    let queue_saturated =
        metrics.queue_known && metrics.queue_length >= config.queue_length_threshold;

    if kv_saturated || queue_saturated {
        return Saturation::Saturated;
    }

    if metrics.is_fully_known() {
        Saturation::NonSaturated
    } else {
        Saturation::Unknown
    }
}

/// Per-variant spare-capacity accumulator, folded over that variant's
/// replicas.
#[derive(Debug, Default)]
struct SpareAccumulator {
    replica_count: u32,
    non_saturated_count: u32,
    spare_kv_sum: f64,
    spare_queue_sum: f64,
}

/// Builds the [`ModelSaturationAnalysis`] for one (model, namespace,
/// accelerator) group from its collected replica metrics.
///
/// `metrics` must already be filtered to the group being analyzed (same
/// model, namespace, accelerator); this function does not re-group.
/// Returns `None` if `metrics` is empty — the engine interprets that as
/// "skip this group, keep last-known" rather than an error.
#[instrument(skip(metrics, config), fields(model_id, namespace, accelerator_name, replicas = metrics.len()))]
pub fn analyze(
    model_id: &str,
    namespace: &str,
    accelerator_name: &str,
    metrics: &[ReplicaMetrics],
    config: &SaturationConfig,
) -> Option<ModelSaturationAnalysis> {
    if metrics.is_empty() {
        debug!("no replica metrics supplied; skipping group");
        return None;
    }

    let mut per_variant: HashMap<&str, SpareAccumulator> = HashMap::new();
    let mut per_variant_order: Vec<&str> = Vec::new();
    let mut per_variant_meta: HashMap<&str, (&str, f64)> = HashMap::new();

    // Group-wide sums over non-saturated replicas, feeding both the group
    // spare-capacity averages and the worst-case scale-down simulation.
    let mut total_kv_non_saturated = 0.0;
    let mut total_queue_non_saturated = 0u64;
    let mut group_spare_kv_sum = 0.0;
    let mut group_spare_queue_sum = 0.0;
    let mut group_non_saturated = 0u32;
    let mut group_replica_count = 0u32;

    for m in metrics {
        let acc = per_variant.entry(&m.variant_name).or_insert_with(|| {
            per_variant_order.push(&m.variant_name);
            SpareAccumulator::default()
        });
        per_variant_meta
            .entry(&m.variant_name)
            .or_insert((&m.accelerator_name, m.cost));

        acc.replica_count += 1;
        group_replica_count += 1;

        match classify(m, config) {
            Saturation::NonSaturated => {
                let spare_kv = config.kv_cache_threshold - m.kv_cache_usage;
                let spare_queue = f64::from(config.queue_length_threshold) - f64::from(m.queue_length);
                acc.non_saturated_count += 1;
                acc.spare_kv_sum += spare_kv;
                acc.spare_queue_sum += spare_queue;

                group_non_saturated += 1;
                group_spare_kv_sum += spare_kv;
                group_spare_queue_sum += spare_queue;
                total_kv_non_saturated += m.kv_cache_usage;
                total_queue_non_saturated += u64::from(m.queue_length);
            }
            Saturation::Saturated | Saturation::Unknown => {}
        }
    }

    let variant_analyses: Vec<VariantSaturationAnalysis> = per_variant_order
        .iter()
        .map(|name| {
            let acc = &per_variant[name];
            let (accelerator_name, cost) = per_variant_meta[name];
            let n = f64::from(acc.non_saturated_count);
            let (avg_spare_kv, avg_spare_queue) = if acc.non_saturated_count == 0 {
                (0.0, 0.0)
            } else {
                (acc.spare_kv_sum / n, acc.spare_queue_sum / n)
            };
            VariantSaturationAnalysis {
                variant_name: (*name).to_string(),
                accelerator_name: accelerator_name.to_string(),
                cost,
                replica_count: acc.replica_count,
                non_saturated_count: acc.non_saturated_count,
                avg_spare_kv,
                avg_spare_queue,
            }
        })
        .collect();

    let group_n = f64::from(group_non_saturated);
    let (avg_spare_kv, avg_spare_queue) = if group_non_saturated == 0 {
        (0.0, 0.0)
    } else {
        (group_spare_kv_sum / group_n, group_spare_queue_sum / group_n)
    };

    let should_scale_up = group_non_saturated == 0
        || avg_spare_kv < config.kv_spare_trigger
        || avg_spare_queue < f64::from(config.queue_spare_trigger);

    let scale_down_safe = scale_down_safe(
        group_non_saturated,
        total_kv_non_saturated,
        total_queue_non_saturated,
        config,
    );

    debug!(
        should_scale_up,
        scale_down_safe,
        group_non_saturated,
        group_replica_count,
        "group saturation analysis complete"
    );

    Some(ModelSaturationAnalysis {
        model_id: model_id.to_string(),
        namespace: namespace.to_string(),
        accelerator_name: accelerator_name.to_string(),
        total_replicas: group_replica_count,
        non_saturated_count: group_non_saturated,
        avg_spare_kv,
        avg_spare_queue,
        should_scale_up,
        scale_down_safe,
        variant_analyses,
    })
}

/// Worst-case scale-down safety simulation: would removing one
/// non-saturated replica's worth of capacity from the group still leave
/// the redistributed average spare capacity above both triggers?
///
/// Never safe with fewer than two non-saturated replicas: removing the
/// only one leaves nothing to redistribute onto, and removing one of two
/// leaves a single replica absorbing the full remaining load, which this
/// simulation treats as the worst case rather than an approximation.
fn scale_down_safe(
    non_saturated_count: u32,
    total_kv: f64,
    total_queue: u64,
    config: &SaturationConfig,
) -> bool {
    if non_saturated_count < 2 {
        return false;
    }
    let n_after = f64::from(non_saturated_count - 1);
    let avg_kv_after = total_kv / n_after;
    let avg_queue_after = total_queue as f64 / n_after;

    let remaining_spare_kv = config.kv_cache_threshold - avg_kv_after;
    let remaining_spare_queue = f64::from(config.queue_length_threshold) - avg_queue_after;

    remaining_spare_kv >= config.kv_spare_trigger
        && remaining_spare_queue >= f64::from(config.queue_spare_trigger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn config() -> SaturationConfig {
        SaturationConfig::default()
    }

    fn metrics(variant: &str, kv: f64, queue: u32) -> ReplicaMetrics {
        ReplicaMetrics {
            pod_name: format!("{variant}-{kv}"),
            variant_name: variant.to_string(),
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

    #[test]
    fn classification_is_exclusive() {
        let cfg = config();
        assert_eq!(classify(&metrics("v1", 0.5, 1), &cfg), Saturation::NonSaturated);
        assert_eq!(classify(&metrics("v1", 0.8, 1), &cfg), Saturation::Saturated);
        assert_eq!(classify(&metrics("v1", 0.5, 5), &cfg), Saturation::Saturated);
    }

    #[test]
    fn partial_data_saturated_when_known_value_over_threshold() {
        let cfg = config();
        let mut m = metrics("v1", 0.95, 0);
        m.queue_known = false;
        assert_eq!(classify(&m, &cfg), Saturation::Saturated);
    }

    #[test]
    fn partial_data_unknown_when_known_value_under_threshold() {
        let cfg = config();
        let mut m = metrics("v1", 0.5, 0);
        m.queue_known = false;
        assert_eq!(classify(&m, &cfg), Saturation::Unknown);
    }

    #[test]
    fn empty_metrics_returns_none() {
        assert!(analyze("m1", "prod", "A100", &[], &config()).is_none());
    }

    #[test]
    fn zero_non_saturated_forces_scale_up_and_blocks_scale_down() {
        let cfg = config();
        let replicas = vec![metrics("v1", 0.95, 10), metrics("v1", 0.92, 9)];
        let analysis = analyze("m1", "prod", "A100", &replicas, &cfg).unwrap();
        assert_eq!(analysis.non_saturated_count, 0);
        assert!(analysis.should_scale_up);
        assert!(!analysis.scale_down_safe);
        assert_eq!(analysis.avg_spare_kv, 0.0);
    }

    #[test]
    fn single_non_saturated_replica_blocks_scale_down() {
        let cfg = config();
        let replicas = vec![metrics("v1", 0.1, 0)];
        let analysis = analyze("m1", "prod", "A100", &replicas, &cfg).unwrap();
        assert_eq!(analysis.non_saturated_count, 1);
        assert!(!analysis.scale_down_safe);
    }

    /// kv=[0.6, 0.6, 0.7], thresholds 0.80/0.10 ⇒ worst-case redistribution
    /// after removing one leaves avgKvAfter = 0.95, exceeding the
    /// threshold; scale-down must be blocked even though plenty of spare
    /// exists today.
    #[test]
    fn worst_case_scale_down_blocks_despite_current_spare() {
        let cfg = config();
        let replicas = vec![
            metrics("v1", 0.6, 0),
            metrics("v1", 0.6, 0),
            metrics("v1", 0.7, 0),
        ];
        let analysis = analyze("m1", "prod", "A100", &replicas, &cfg).unwrap();
        assert_eq!(analysis.non_saturated_count, 3);
        assert!(!analysis.should_scale_up);
        assert!(!analysis.scale_down_safe);
    }

    #[test]
    fn scale_down_safe_when_ample_spare_remains() {
        let cfg = config();
        let replicas = vec![
            metrics("v1", 0.1, 0),
            metrics("v1", 0.1, 0),
            metrics("v1", 0.1, 0),
        ];
        let analysis = analyze("m1", "prod", "A100", &replicas, &cfg).unwrap();
        assert!(analysis.scale_down_safe);
        assert!(!analysis.should_scale_up);
    }

    #[test]
    fn per_variant_rollups_are_independent() {
        let cfg = config();
        let replicas = vec![metrics("v1", 0.95, 0), metrics("v2", 0.1, 0)];
        let analysis = analyze("m1", "prod", "A100", &replicas, &cfg).unwrap();
        assert_eq!(analysis.variant_analyses.len(), 2);
        let v1 = analysis.variant_analyses.iter().find(|v| v.variant_name == "v1").unwrap();
        let v2 = analysis.variant_analyses.iter().find(|v| v.variant_name == "v2").unwrap();
        assert_eq!(v1.non_saturated_count, 0);
        assert_eq!(v2.non_saturated_count, 1);
    }
}
