//! The optimization loop: a periodic tick that enumerates variants, groups
//! them by scaling domain, runs collection and analysis per group, and
//! either writes a fresh decision or falls back to safety-net emission.
//!
//! The engine never touches the object store's status subresource and
//! never publishes the target metric directly — both of those are the
//! reconciler's job, woken through the trigger bus after this tick's
//! decisions land in the cache. This keeps analysis and publication from
//! racing each other over the same API object.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};
use variant_autoscaler_config::{ControllerEnv, LoopConfig, SaturationConfigMap};

use crate::cache::{DecisionCache, TriggerSender, VariantKey};
use crate::collector;
use crate::error::Result;
use crate::metrics_source::MetricsSource;
use crate::retry::with_backoff;
use crate::store::{DeploymentStatus, ObjectStore};
use crate::types::{GroupKey, Variant, VariantDecision, VariantReplicaState};
use crate::{analyze, planner};

/// Everything the engine needs to run one tick: object-store handles,
/// metrics source, the decision cache/trigger bus it publishes to, and the
/// shared, hot-reloadable configuration.
pub struct Engine {
    variant_store: Arc<dyn ObjectStore<Variant>>,
    deployment_store: Arc<dyn ObjectStore<DeploymentStatus>>,
    metrics_source: Arc<MetricsSource>,
    cache: DecisionCache,
    trigger: TriggerSender,
    saturation_config: Arc<RwLock<SaturationConfigMap>>,
    loop_config: Arc<RwLock<LoopConfig>>,
    env: ControllerEnv,
    running: Arc<AtomicBool>,
}

impl Engine {
    /// Builds an engine over the given collaborators. `cache` and
    /// `trigger` are expected to be shared with the reconciler that reads
    /// them.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        variant_store: Arc<dyn ObjectStore<Variant>>,
        deployment_store: Arc<dyn ObjectStore<DeploymentStatus>>,
        metrics_source: Arc<MetricsSource>,
        cache: DecisionCache,
        trigger: TriggerSender,
        saturation_config: Arc<RwLock<SaturationConfigMap>>,
        loop_config: Arc<RwLock<LoopConfig>>,
        env: ControllerEnv,
    ) -> Self {
        Self {
            variant_store,
            deployment_store,
            metrics_source,
            cache,
            trigger,
            saturation_config,
            loop_config,
            env,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Runs the periodic tick loop until `stop` is called. The interval is
    /// re-read from `loop_config` before every sleep, so a ConfigMap change
    /// takes effect starting with the next tick, not the currently-waiting
    /// one.
    #[instrument(skip(self))]
    pub async fn run(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("engine already running; ignoring duplicate run() call");
            return;
        }
        info!("starting optimization loop");

        while self.running.load(Ordering::SeqCst) {
            let interval = self.loop_config.read().await.interval();
            tokio::time::sleep(interval).await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            if let Err(e) = self.tick().await {
                error!(error = %e, "optimization tick failed");
            }
        }

        info!("optimization loop stopped");
    }

    /// Signals the run loop to exit after its current sleep.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Runs exactly one optimization cycle: list, group, analyze, decide.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<()> {
        let label_selector = self.env.controller_instance.as_deref();
        let variants = with_backoff("list_all_variants", || self.variant_store.list_all(label_selector)).await?;
        info!(variant_count = variants.len(), "enumerated active variants");

        let mut groups: HashMap<GroupKey, Vec<Variant>> = HashMap::new();
        for variant in variants {
            groups.entry(GroupKey::for_variant(&variant)).or_default().push(variant);
        }

        for (group_key, group_variants) in groups {
            if let Err(e) = self.run_group(&group_key, &group_variants).await {
                error!(
                    model_id = %group_key.model_id,
                    namespace = %group_key.namespace,
                    accelerator = %group_key.accelerator_name,
                    error = %e,
                    "group processing failed entirely; decisions for this group were not updated"
                );
            }
        }

        Ok(())
    }

    /// Processes one (model, namespace, accelerator) group: fetches
    /// deployment state, collects metrics, analyzes, computes targets, and
    /// writes decisions — or emits the safety net if collection failed.
    #[instrument(skip(self, variants), fields(model_id = %group.model_id, namespace = %group.namespace, accelerator = %group.accelerator_name))]
    async fn run_group(&self, group: &GroupKey, variants: &[Variant]) -> Result<()> {
        let mut deployments = HashMap::with_capacity(variants.len());
        for variant in variants {
            match with_backoff("get_deployment_status", || {
                self.deployment_store.get(&variant.namespace, &variant.scale_target_name)
            })
            .await
            {
                Ok(Some(status)) => {
                    deployments.insert(variant.name.clone(), status);
                }
                Ok(None) => {
                    warn!(variant = %variant.name, "target deployment not found; skipping variant this cycle");
                }
                Err(e) => {
                    warn!(variant = %variant.name, error = %e, "failed to fetch target deployment");
                }
            }
        }

        let metrics = match collector::collect(&self.metrics_source, &group.model_id, &group.namespace, variants).await {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!(error = %e, "metrics collection failed; emitting safety net for group");
                self.emit_safety_net(variants, &deployments, &e).await;
                return Ok(());
            }
        };

        if metrics.is_empty() {
            info!("no metrics returned for group; keeping last-known decisions");
            return Ok(());
        }

        let config = {
            let saturation = self.saturation_config.read().await;
            *saturation.resolve(&group.model_id, &group.namespace)
        };

        let Some(analysis) = analyze::analyze(&group.model_id, &group.namespace, &group.accelerator_name, &metrics, &config) else {
            info!("analysis produced no result; keeping last-known decisions");
            return Ok(());
        };

        let mut states = HashMap::with_capacity(variants.len());
        for variant in variants {
            let Some(deployment) = deployments.get(&variant.name) else {
                continue;
            };
            let previous = self
                .cache
                .get(&VariantKey::new(&variant.namespace, &variant.name))
                .await;
            states.insert(
                variant.name.clone(),
                VariantReplicaState {
                    current_replicas: deployment.current_replicas,
                    ready_replicas: deployment.ready_replicas,
                    desired_replicas: previous.map(|d| d.desired_replicas).unwrap_or(0),
                },
            );
        }

        let targets = planner::calculate_saturation_targets(&analysis, &states);
        let now = Utc::now();

        // Invariant: every decision from this tick lands in the cache
        // before any wake-up for this group is sent, so a woken reconciler
        // never reads a stale entry for a variant its own tick just decided.
        let mut written = Vec::with_capacity(targets.len());
        for variant in variants {
            let Some(target) = targets.get(&variant.name) else {
                continue;
            };
            let Some(state) = states.get(&variant.name) else {
                continue;
            };
            let decision = VariantDecision::analyzed(
                &variant.name,
                &variant.namespace,
                &variant.model_id,
                &variant.accelerator_name,
                variant.cost,
                state.current_replicas,
                target.target_replicas,
                &target.reason,
                now,
            );
            let key = VariantKey::new(&variant.namespace, &variant.name);
            self.cache.set(key.clone(), decision).await;
            written.push(key);
        }

        for key in written {
            self.trigger.notify(key);
        }

        Ok(())
    }

    /// Publishes a safe fallback decision for every variant in a group
    /// whose metrics collection failed this cycle, so the downstream
    /// autoscaler never observes an absent target.
    async fn emit_safety_net(
        &self,
        variants: &[Variant],
        deployments: &HashMap<String, DeploymentStatus>,
        cause: &crate::error::AutoscalerError,
    ) {
        let now = Utc::now();
        let mut written = Vec::with_capacity(variants.len());

        for variant in variants {
            let current_replicas = deployments.get(&variant.name).map_or(0, |d| d.current_replicas);
            let previous = self
                .cache
                .get(&VariantKey::new(&variant.namespace, &variant.name))
                .await;
            let fallback_target = match previous.as_ref().map(|d| d.desired_replicas) {
                Some(desired) if desired != 0 => desired,
                _ => current_replicas,
            };

            let decision = VariantDecision::safety_net(
                &variant.name,
                &variant.namespace,
                &variant.model_id,
                variant.cost,
                current_replicas,
                fallback_target,
                cause.reason_code(),
                cause.to_string(),
                now,
            );
            let key = VariantKey::new(&variant.namespace, &variant.name);
            self.cache.set(key.clone(), decision).await;
            written.push(key);
        }

        for key in written {
            self.trigger.notify(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics_source::{fake::FakeQueryExecutor, MetricRow, MetricsSourceConfig};
    use crate::store::fake::FakeObjectStore;
    use variant_autoscaler_config::SaturationConfig;

    fn variant(name: &str, namespace: &str, target: &str, cost: f64) -> Variant {
        Variant {
            namespace: namespace.to_string(),
            name: name.to_string(),
            model_id: "m1".to_string(),
            scale_target_name: target.to_string(),
            accelerator_name: "A100".to_string(),
            cost,
            controller_instance: None,
            deletion_timestamp: None,
        }
    }

    async fn build_engine(
        executor: FakeQueryExecutor,
    ) -> (
        Engine,
        FakeObjectStore<Variant>,
        FakeObjectStore<DeploymentStatus>,
        DecisionCache,
    ) {
        let variant_store = FakeObjectStore::<Variant>::default();
        let deployment_store = FakeObjectStore::<DeploymentStatus>::default();
        let metrics_source = Arc::new(MetricsSource::new(Arc::new(executor), MetricsSourceConfig::default()));
        crate::collector::register_collector_queries(&metrics_source).await;
        let cache = DecisionCache::new();
        let (trigger, _rx) = crate::cache::new_trigger_bus(8);
        let saturation_config = Arc::new(RwLock::new(SaturationConfigMap::with_default_only(SaturationConfig::default())));
        let loop_config = Arc::new(RwLock::new(LoopConfig::default()));

        let engine = Engine::new(
            Arc::new(variant_store.clone()),
            Arc::new(deployment_store.clone()),
            metrics_source,
            cache.clone(),
            trigger,
            saturation_config,
            loop_config,
            ControllerEnv::default(),
        );
        (engine, variant_store, deployment_store, cache)
    }

    #[tokio::test]
    async fn safety_net_emitted_on_backend_failure() {
        let executor = FakeQueryExecutor::default(); // nothing staged => every query fails
        let (engine, variant_store, deployment_store, cache) = build_engine(executor).await;

        let v1 = variant("v1", "prod", "v1-deploy", 10.0);
        variant_store.insert("prod", "v1", v1.clone()).await;
        deployment_store
            .insert(
                "prod",
                "v1-deploy",
                DeploymentStatus {
                    current_replicas: 4,
                    ready_replicas: 4,
                },
            )
            .await;

        engine.tick().await.unwrap();

        let decision = cache.get(&crate::cache::VariantKey::new("prod", "v1")).await.unwrap();
        assert!(!decision.metrics_available);
        assert_eq!(decision.target_replicas, 4);
    }

    #[tokio::test]
    async fn empty_metrics_skips_group_without_error() {
        let executor = FakeQueryExecutor::default();
        executor.stage_ok(
            r#"kv_cache_usage_ratio{namespace="prod",model_id="m1",pod=~"v1-deploy-.*"}"#,
            vec![],
        );
        executor.stage_ok(
            r#"inference_queue_length{namespace="prod",model_id="m1",pod=~"v1-deploy-.*"}"#,
            vec![],
        );
        let (engine, variant_store, deployment_store, cache) = build_engine(executor).await;
        let v1 = variant("v1", "prod", "v1-deploy", 10.0);
        variant_store.insert("prod", "v1", v1).await;
        deployment_store
            .insert("prod", "v1-deploy", DeploymentStatus { current_replicas: 2, ready_replicas: 2 })
            .await;

        engine.tick().await.unwrap();
        assert!(cache.get(&crate::cache::VariantKey::new("prod", "v1")).await.is_none());
    }

    #[tokio::test]
    async fn successful_cycle_writes_decision() {
        let now = Utc::now();
        let executor = FakeQueryExecutor::default();
        executor.stage_ok(
            r#"kv_cache_usage_ratio{namespace="prod",model_id="m1",pod=~"v1-deploy-.*"}"#,
            vec![MetricRow { pod_name: "v1-deploy-0".to_string(), value: 0.95, timestamp: now }],
        );
        executor.stage_ok(
            r#"inference_queue_length{namespace="prod",model_id="m1",pod=~"v1-deploy-.*"}"#,
            vec![MetricRow { pod_name: "v1-deploy-0".to_string(), value: 10.0, timestamp: now }],
        );
        let (engine, variant_store, deployment_store, cache) = build_engine(executor).await;
        let v1 = variant("v1", "prod", "v1-deploy", 10.0);
        variant_store.insert("prod", "v1", v1).await;
        deployment_store
            .insert("prod", "v1-deploy", DeploymentStatus { current_replicas: 1, ready_replicas: 1 })
            .await;

        engine.tick().await.unwrap();
        let decision = cache.get(&crate::cache::VariantKey::new("prod", "v1")).await.unwrap();
        assert!(decision.metrics_available);
        assert_eq!(decision.target_replicas, 2);
        assert_eq!(decision.action, crate::types::ScalingAction::ScaleUp);
    }
}
