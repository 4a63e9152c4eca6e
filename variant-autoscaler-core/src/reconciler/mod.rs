//! Event-driven reconciliation: turns a cached decision into a status
//! patch on the variant object and a published target metric.
//!
//! The reconciler never computes a decision itself — it only publishes the
//! most recent one the engine already wrote to the [`DecisionCache`]. This
//! keeps a wake-up cheap regardless of how expensive the analysis that
//! produced the decision was.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, instrument, warn};
use variant_autoscaler_config::ControllerEnv;

use crate::cache::{DecisionCache, VariantKey};
use crate::error::Result;
use crate::retry::with_backoff;
use crate::sink::{MetricLabels, MetricSink};
use crate::store::{DeploymentStatus, ObjectStore, WatchEvent};
use crate::types::Variant;

/// Applies cached decisions to variant status and publishes the target
/// metric. Stateless beyond its collaborators — safe to run as many
/// concurrent workers, one in-flight reconcile per variant key.
pub struct Reconciler {
    variant_store: Arc<dyn ObjectStore<Variant>>,
    deployment_store: Arc<dyn ObjectStore<DeploymentStatus>>,
    cache: DecisionCache,
    metric_sink: Arc<dyn MetricSink>,
    env: ControllerEnv,
}

impl Reconciler {
    /// Builds a reconciler over the given collaborators.
    pub fn new(
        variant_store: Arc<dyn ObjectStore<Variant>>,
        deployment_store: Arc<dyn ObjectStore<DeploymentStatus>>,
        cache: DecisionCache,
        metric_sink: Arc<dyn MetricSink>,
        env: ControllerEnv,
    ) -> Self {
        Self {
            variant_store,
            deployment_store,
            cache,
            metric_sink,
            env,
        }
    }

    /// Runs one reconcile for the variant identified by `key`: resolves the
    /// scale target, applies the cached decision to status, and publishes
    /// the target metric.
    #[instrument(skip(self), fields(namespace = %key.namespace, variant = %key.name))]
    pub async fn reconcile(&self, key: &VariantKey) -> Result<()> {
        let Some(variant) = with_backoff("get_variant", || self.variant_store.get(&key.namespace, &key.name)).await? else {
            debug!("variant not found; nothing to reconcile");
            return Ok(());
        };

        if variant.deletion_timestamp.is_some() {
            debug!("variant marked for deletion; skipping");
            return Ok(());
        }

        let now = Utc::now();
        let deployment = with_backoff("get_deployment_status", || {
            self.deployment_store.get(&variant.namespace, &variant.scale_target_name)
        })
        .await?;

        if deployment.is_none() {
            let patch = json!({
                "status": {
                    "conditions": [condition(
                        "TargetResolved",
                        false,
                        "TargetNotFound",
                        format!("target deployment {} not found", variant.scale_target_name),
                        now,
                    )],
                }
            });
            with_backoff("patch_status", || self.variant_store.patch_status(&variant.namespace, &variant.name, patch.clone())).await?;
            warn!(target = %variant.scale_target_name, "target deployment not found");
            return Ok(());
        }

        let mut conditions = vec![condition("TargetResolved", true, "Resolved", "target deployment found", now)];
        let mut status: Map<String, Value> = Map::new();
        let decision = self.cache.get(key).await;
        let mut published_target = None;

        match &decision {
            Some(d) if !d.accelerator_name.is_empty() => {
                debug!(decision_id = %d.decision_id, target = d.target_replicas, "applying cached decision to status");
                status.insert(
                    "desiredOptimizedAlloc".to_string(),
                    json!({
                        "numReplicas": d.target_replicas,
                        "accelerator": d.accelerator_name,
                        "lastRunTime": d.last_run_time.to_rfc3339(),
                    }),
                );
                conditions.push(condition("MetricsAvailable", true, "Analyzed", &d.reason, now));
                published_target = Some(d.target_replicas);
            }
            Some(d) if d.accelerator_name.is_empty() && !d.metrics_available => {
                conditions.push(condition(
                    "MetricsAvailable",
                    false,
                    d.metrics_reason.as_deref().unwrap_or("Unknown"),
                    d.metrics_message.as_deref().unwrap_or("metrics unavailable"),
                    now,
                ));
                published_target = Some(d.target_replicas);
            }
            Some(_) | None => {
                debug!("no actionable decision cached yet; status left untouched");
            }
        }

        conditions.push(if published_target.is_some() {
            condition("OptimizationReady", true, "Published", "target replica count published to metric sink", now)
        } else {
            condition("OptimizationReady", false, "NoDecisionYet", "no cached decision available for this variant", now)
        });

        status.insert("conditions".to_string(), Value::Array(conditions));
        let status_patch = Value::Object(status);
        with_backoff("patch_status", || {
            self.variant_store.patch_status(&variant.namespace, &variant.name, status_patch.clone())
        })
        .await?;

        if let Some(target) = published_target {
            let labels = MetricLabels {
                namespace: &variant.namespace,
                variant_name: &variant.name,
                model_id: &variant.model_id,
                accelerator_name: &variant.accelerator_name,
                controller_instance: self.env.controller_instance.as_deref(),
            };
            match self.metric_sink.set_target(labels, target) {
                Ok(()) => {
                    let applied_patch = json!({"status": {"actuation": {"applied": true}}});
                    with_backoff("patch_status", || {
                        self.variant_store.patch_status(&variant.namespace, &variant.name, applied_patch.clone())
                    })
                    .await?;
                }
                Err(e) => {
                    warn!(error = %e, "failed to publish target metric; reconcile still succeeds");
                }
            }
        }

        Ok(())
    }
}

fn condition(ctype: &str, status: bool, reason: impl Into<String>, message: impl Into<String>, now: DateTime<Utc>) -> Value {
    json!({
        "type": ctype,
        "status": if status { "True" } else { "False" },
        "reason": reason.into(),
        "message": message.into(),
        "lastTransitionTime": now.to_rfc3339(),
    })
}

/// Variant-object watch predicate: only creations enqueue a reconcile.
/// Updates and deletes are handled by the periodic loop and trigger-bus
/// wake-ups respectively, not by re-running this procedure.
pub fn should_enqueue_variant_event(event: &WatchEvent<Variant>) -> bool {
    matches!(event, WatchEvent::Created(_))
}

/// Deployment watch predicate: only creations and deletions enqueue a
/// reconcile, to unblock a variant waiting on `TargetResolved` or react to
/// its target disappearing. Plain status updates are ignored — the loop's
/// own tick already reads fresh deployment state every cycle.
pub fn should_enqueue_deployment_event(event: &WatchEvent<DeploymentStatus>) -> bool {
    matches!(event, WatchEvent::Created(_) | WatchEvent::Deleted { .. })
}

/// ConfigMap watch predicate: only the two known config map names in the
/// operator's own namespace trigger a (global, non-per-variant) refresh.
pub fn should_refresh_config(namespace: &str, name: &str, env: &ControllerEnv) -> bool {
    namespace == env.pod_namespace && (name == env.config_map_name || name == env.saturation_config_map_name)
}

/// ServiceMonitor watch predicate: these objects exist purely for the
/// controller's own observability and never drive a reconcile.
pub fn should_enqueue_servicemonitor_event() -> bool {
    false
}
