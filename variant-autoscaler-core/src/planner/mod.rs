//! Per-variant target replica computation (`CalculateSaturationTargets`):
//! given a [`ModelSaturationAnalysis`] and each variant's current replica
//! bookkeeping, decides which single variant in the group
//! absorbs this cycle's one unit of scale-up or scale-down, and which
//! variants are held at their previously published target pending rollout.

use std::collections::HashMap;

use tracing::{debug, instrument};

use crate::types::{ModelSaturationAnalysis, VariantReplicaState};

/// The target this cycle computed for one variant, plus a short
/// human-readable justification surfaced on the resulting
/// `VariantDecision::reason`.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantTarget {
    /// Replica count this cycle recommends.
    pub target_replicas: u32,
    /// Why this variant received this target.
    pub reason: String,
}

/// Computes the per-variant target map for one analyzed group.
///
/// `states` must contain an entry for every variant in the group,
/// including ones [`crate::analyze::analyze`] excluded for lacking fresh
/// metrics: a variant with zero ready replicas and no metrics is excluded
/// from selection and held at its current replica count.
#[instrument(skip(analysis, states), fields(model_id = %analysis.model_id, namespace = %analysis.namespace, variants = states.len()))]
pub fn calculate_saturation_targets(
    analysis: &ModelSaturationAnalysis,
    states: &HashMap<String, VariantReplicaState>,
) -> HashMap<String, VariantTarget> {
    let mut targets = HashMap::with_capacity(states.len());
    let mut preserved: Vec<String> = Vec::new();

    // Step 1: preservation. A variant whose previous decision has not yet
    // been realized by the orchestrator keeps that target untouched,
    // regardless of what this cycle's analysis would otherwise do.
    for (name, state) in states {
        if state.desired_replicas != 0 && state.desired_replicas != state.current_replicas {
            targets.insert(
                name.clone(),
                VariantTarget {
                    target_replicas: state.desired_replicas,
                    reason: format!(
                        "preserved previous target {} pending rollout (current {})",
                        state.desired_replicas, state.current_replicas
                    ),
                },
            );
            preserved.push(name.clone());
        }
    }

    // Variants with no entry in the analysis had no fresh metrics this
    // cycle; they are never eligible for selection and simply hold at
    // their current replica count.
    let costs: HashMap<&str, f64> = analysis
        .variant_analyses
        .iter()
        .map(|v| (v.variant_name.as_str(), v.cost))
        .collect();

    for (name, state) in states {
        if preserved.contains(name) {
            continue;
        }
        if !costs.contains_key(name.as_str()) {
            targets.insert(
                name.clone(),
                VariantTarget {
                    target_replicas: state.current_replicas,
                    reason: "no fresh metrics this cycle: held at current replica count".to_string(),
                },
            );
        }
    }

    let eligible: Vec<&String> = states
        .keys()
        .filter(|name| !preserved.contains(name) && costs.contains_key(name.as_str()))
        .collect();

    if analysis.should_scale_up {
        scale_up(&eligible, states, &costs, &mut targets);
    } else if analysis.scale_down_safe {
        scale_down(&eligible, states, &costs, &mut targets);
    } else {
        for name in &eligible {
            let ready = states[*name].ready_replicas;
            targets.insert(
                (*name).clone(),
                VariantTarget {
                    target_replicas: ready,
                    reason: "group within spare-capacity triggers: no change".to_string(),
                },
            );
        }
    }

    debug!(targets = targets.len(), "computed saturation targets");
    targets
}

/// Among eligible (non-preserved) variants with no pending replicas, picks
/// the cheapest — tie-break lexicographically smallest name — to absorb
/// `+1`. Every other eligible variant holds at its ready count.
///
/// Variants with `pending_replicas() > 0` are skipped entirely, to avoid
/// piling more capacity onto a variant that is already mid-scale-up: if
/// every eligible variant is pending, nobody scales up this cycle.
fn scale_up(
    eligible: &[&String],
    states: &HashMap<String, VariantReplicaState>,
    costs: &HashMap<&str, f64>,
    targets: &mut HashMap<String, VariantTarget>,
) {
    let candidate = eligible
        .iter()
        .filter(|name| states[**name].pending_replicas() == 0)
        .min_by(|a, b| {
            let cost_a = costs[a.as_str()];
            let cost_b = costs[b.as_str()];
            cost_a
                .partial_cmp(&cost_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(b))
        })
        .cloned();

    for name in eligible {
        let ready = states[*name].ready_replicas;
        if Some(*name) == candidate {
            targets.insert(
                (*name).clone(),
                VariantTarget {
                    target_replicas: ready + 1,
                    reason: format!("cheapest eligible variant (cost {:.2}), group below spare trigger", costs[name.as_str()]),
                },
            );
        } else {
            let reason = if states[*name].pending_replicas() > 0 {
                "pending replicas: skipped to prevent cascade scale-up".to_string()
            } else {
                "group below spare trigger: held, cheaper variant selected".to_string()
            };
            targets.insert((*name).clone(), VariantTarget { target_replicas: ready, reason });
        }
    }
}

/// Among eligible variants with `ready_replicas >= 2`, picks the most
/// expensive — tie-break lexicographically largest name — to absorb `-1`.
/// Every other eligible variant holds at its ready count. Unlike scale-up,
/// pending replicas do not gate this selection: removing capacity is safe
/// while other pods in the group are still starting.
fn scale_down(
    eligible: &[&String],
    states: &HashMap<String, VariantReplicaState>,
    costs: &HashMap<&str, f64>,
    targets: &mut HashMap<String, VariantTarget>,
) {
    let candidate = eligible
        .iter()
        .filter(|name| states[**name].ready_replicas >= 2)
        .max_by(|a, b| {
            let cost_a = costs[a.as_str()];
            let cost_b = costs[b.as_str()];
            cost_a
                .partial_cmp(&cost_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(b))
        })
        .cloned();

    for name in eligible {
        let ready = states[*name].ready_replicas;
        if Some(*name) == candidate {
            targets.insert(
                (*name).clone(),
                VariantTarget {
                    target_replicas: ready - 1,
                    reason: format!("most expensive eligible variant (cost {:.2}), group has safe spare capacity", costs[name.as_str()]),
                },
            );
        } else {
            targets.insert(
                (*name).clone(),
                VariantTarget {
                    target_replicas: ready,
                    reason: "group has safe spare capacity: held, more expensive variant selected".to_string(),
                },
            );
        }
    }
}
