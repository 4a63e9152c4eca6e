//! Data model shared by every component of the decision core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// A scaling unit: a specific model bound to a specific accelerator type,
/// deployed under one namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    /// Namespace the variant's deployment lives in.
    pub namespace: String,
    /// Name of the variant object itself.
    pub name: String,
    /// Model identity shared by every variant of the same model family.
    pub model_id: String,
    /// Name of the deployment this variant's replica count drives.
    pub scale_target_name: String,
    /// Accelerator type this variant runs on (e.g. `"A100"`, `"H100"`).
    pub accelerator_name: String,
    /// Cost per replica, used to pick which variant absorbs a scale-up or
    /// scale-down within a group. Defaults to 10.0 when unset upstream.
    pub cost: f64,
    /// Controller-instance label, when this cluster hosts more than one
    /// core and variants are partitioned between them.
    pub controller_instance: Option<String>,
    /// Set by the API server once deletion has been requested; the
    /// reconciler treats a variant carrying this as already gone.
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

/// A single running instance of a [`Variant`], identified by pod name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    /// Pod name backing this replica.
    pub pod_name: String,
    /// Name of the variant this replica belongs to.
    pub variant_name: String,
}

/// One replica's live telemetry, joined from the metrics source with
/// deployment/pod identity by the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaMetrics {
    /// Pod name this sample came from.
    pub pod_name: String,
    /// Variant this replica belongs to.
    pub variant_name: String,
    /// Model identity, duplicated here so the analyzer can group without a
    /// second join.
    pub model_id: String,
    /// Namespace, duplicated for the same reason.
    pub namespace: String,
    /// Accelerator type, duplicated for the same reason.
    pub accelerator_name: String,
    /// Cost per replica for this variant.
    pub cost: f64,
    /// KV-cache usage fraction in `[0, 1]`.
    pub kv_cache_usage: f64,
    /// Number of requests currently queued on this replica.
    pub queue_length: u32,
    /// `false` if no fresh KV-cache sample was found for this pod; in that
    /// case `kv_cache_usage` is `0.0` and must not be treated as a real
    /// reading.
    pub kv_cache_known: bool,
    /// `false` if no fresh queue-length sample was found for this pod; in
    /// that case `queue_length` is `0` and must not be treated as a real
    /// reading.
    pub queue_known: bool,
    /// Timestamp of the underlying time-series sample (not query time).
    pub timestamp: DateTime<Utc>,
}

impl ReplicaMetrics {
    /// `true` if both KV-cache and queue samples were found for this pod.
    pub fn is_fully_known(&self) -> bool {
        self.kv_cache_known && self.queue_known
    }
}

/// Replica-count bookkeeping for one variant, read from its deployment and
/// its own previously published decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantReplicaState {
    /// Replica count the deployment currently has, whether ready or not.
    pub current_replicas: u32,
    /// Replica count the deployment reports as ready and, in practice, able
    /// to supply fresh metrics.
    pub ready_replicas: u32,
    /// The previously published target, or 0 if none has ever been
    /// published.
    pub desired_replicas: u32,
}

impl VariantReplicaState {
    /// Replicas the orchestrator counts but which are not yet ready —
    /// typically still loading model weights. Clamped to 0 if the inputs
    /// are inconsistent (`current_replicas < ready_replicas`).
    pub fn pending_replicas(&self) -> u32 {
        if self.current_replicas < self.ready_replicas {
            warn!(
                current_replicas = self.current_replicas,
                ready_replicas = self.ready_replicas,
                "ready_replicas exceeds current_replicas; clamping pending_replicas to 0"
            );
        }
        self.current_replicas.saturating_sub(self.ready_replicas)
    }
}

/// Per-variant rollup inside a [`ModelSaturationAnalysis`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSaturationAnalysis {
    /// Variant this rollup describes.
    pub variant_name: String,
    /// Accelerator type this variant runs on.
    pub accelerator_name: String,
    /// Cost per replica.
    pub cost: f64,
    /// Number of replicas that supplied fresh metrics this cycle.
    pub replica_count: u32,
    /// Number of those replicas classified non-saturated.
    pub non_saturated_count: u32,
    /// Average spare KV-cache capacity across non-saturated replicas.
    pub avg_spare_kv: f64,
    /// Average spare queue capacity across non-saturated replicas.
    pub avg_spare_queue: f64,
}

/// The outcome of saturation analysis for one (model, namespace,
/// accelerator) scaling domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSaturationAnalysis {
    /// Model identity this group analyzes.
    pub model_id: String,
    /// Namespace this group is scoped to.
    pub namespace: String,
    /// Accelerator type shared by every variant in this group.
    pub accelerator_name: String,
    /// Replicas across all variants that supplied fresh metrics.
    pub total_replicas: u32,
    /// Replicas classified non-saturated.
    pub non_saturated_count: u32,
    /// Average spare KV-cache capacity across all non-saturated replicas in
    /// the group.
    pub avg_spare_kv: f64,
    /// Average spare queue capacity across all non-saturated replicas in the
    /// group.
    pub avg_spare_queue: f64,
    /// Whether the group's spare capacity fell below the scale-up triggers.
    pub should_scale_up: bool,
    /// Whether removing one replica from the busiest non-saturated variant
    /// would still leave the group's spare capacity above the triggers.
    pub scale_down_safe: bool,
    /// Per-variant rollups, in the order variants were supplied.
    pub variant_analyses: Vec<VariantSaturationAnalysis>,
}

/// The action implied by comparing a decision's target to its current
/// replica count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalingAction {
    /// Target is greater than the current replica count.
    ScaleUp,
    /// Target is less than the current replica count.
    ScaleDown,
    /// Target equals the current replica count.
    NoChange,
}

impl ScalingAction {
    /// Derives the action by comparing `target` against `current`.
    pub fn derive(current: u32, target: u32) -> Self {
        match target.cmp(&current) {
            std::cmp::Ordering::Greater => ScalingAction::ScaleUp,
            std::cmp::Ordering::Less => ScalingAction::ScaleDown,
            std::cmp::Ordering::Equal => ScalingAction::NoChange,
        }
    }
}

/// A fully-formed per-variant decision, ready to be written to the decision
/// cache and, eventually, published by the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantDecision {
    /// Unique identifier for this decision, minted fresh each cycle. Lets
    /// logs, events, and the status condition's message correlate back to
    /// the exact analysis run that produced a given target, even across
    /// two cycles that happen to compute the same `target_replicas`.
    pub decision_id: Uuid,
    /// Variant this decision targets.
    pub variant_name: String,
    /// Namespace the variant lives in.
    pub namespace: String,
    /// Model identity.
    pub model_id: String,
    /// Accelerator type. Empty when this decision is a safety-net fallback
    /// produced without a completed analysis.
    pub accelerator_name: String,
    /// Cost per replica.
    pub cost: f64,
    /// Replica count the deployment had when this decision was made.
    pub current_replicas: u32,
    /// The replica count this decision recommends publishing.
    pub target_replicas: u32,
    /// The replica count this decision recommends storing as
    /// `desiredReplicas` for the next cycle's preservation check.
    pub desired_replicas: u32,
    /// Scale-up, scale-down, or no-change, derived from `current_replicas`
    /// and `target_replicas`.
    pub action: ScalingAction,
    /// Short human-readable explanation (e.g. "cheapest of 2 variants,
    /// group below spare trigger").
    pub reason: String,
    /// When this decision was produced.
    pub last_run_time: DateTime<Utc>,
    /// Whether this decision came from a completed analysis (`true`) or
    /// from safety-net fallback due to a metrics failure (`false`).
    pub metrics_available: bool,
    /// Machine-readable reason code when `metrics_available` is `false`.
    pub metrics_reason: Option<String>,
    /// Human-readable message accompanying `metrics_reason`.
    pub metrics_message: Option<String>,
}

impl VariantDecision {
    /// A decision reached through a completed analysis cycle.
    #[allow(clippy::too_many_arguments)]
    pub fn analyzed(
        variant_name: impl Into<String>,
        namespace: impl Into<String>,
        model_id: impl Into<String>,
        accelerator_name: impl Into<String>,
        cost: f64,
        current_replicas: u32,
        target_replicas: u32,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            decision_id: Uuid::new_v4(),
            variant_name: variant_name.into(),
            namespace: namespace.into(),
            model_id: model_id.into(),
            accelerator_name: accelerator_name.into(),
            cost,
            current_replicas,
            target_replicas,
            desired_replicas: target_replicas,
            action: ScalingAction::derive(current_replicas, target_replicas),
            reason: reason.into(),
            last_run_time: now,
            metrics_available: true,
            metrics_reason: None,
            metrics_message: None,
        }
    }

    /// A safety-net fallback decision produced without a completed
    /// analysis, guaranteeing a published target even on metrics failure.
    pub fn safety_net(
        variant_name: impl Into<String>,
        namespace: impl Into<String>,
        model_id: impl Into<String>,
        cost: f64,
        current_replicas: u32,
        fallback_target: u32,
        reason_code: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            decision_id: Uuid::new_v4(),
            variant_name: variant_name.into(),
            namespace: namespace.into(),
            model_id: model_id.into(),
            accelerator_name: String::new(),
            cost,
            current_replicas,
            target_replicas: fallback_target,
            desired_replicas: fallback_target,
            action: ScalingAction::derive(current_replicas, fallback_target),
            reason: "safety-net: metrics unavailable".to_string(),
            last_run_time: now,
            metrics_available: false,
            metrics_reason: Some(reason_code.into()),
            metrics_message: Some(message.into()),
        }
    }
}

/// Identifies one independent scaling domain: variants in different groups
/// never compete with each other for scale-up/scale-down selection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    /// Model identity shared by every variant in the group.
    pub model_id: String,
    /// Namespace shared by every variant in the group.
    pub namespace: String,
    /// Accelerator type shared by every variant in the group.
    pub accelerator_name: String,
}

impl GroupKey {
    /// Builds the key a [`Variant`] belongs to.
    pub fn for_variant(variant: &Variant) -> Self {
        Self {
            model_id: variant.model_id.clone(),
            namespace: variant.namespace.clone(),
            accelerator_name: variant.accelerator_name.clone(),
        }
    }
}
