//! Joins raw time-series rows with pod/deployment identity to produce one
//! [`ReplicaMetrics`] per ready replica of a (model, namespace) group.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use tracing::{debug, instrument, warn};

use crate::error::Result;
use crate::metrics_source::{escape_label_value, validate_namespace, MetricRow, MetricsSource};
use crate::types::{ReplicaMetrics, Variant};

const KV_CACHE_QUERY: &str = "kv_cache_usage";
const QUEUE_LENGTH_QUERY: &str = "queue_length";

/// Registers the two query templates the collector depends on. Call once at
/// startup before the first `collect` call; re-registering is harmless.
pub async fn register_collector_queries(source: &MetricsSource) {
    source
        .register_query(crate::metrics_source::QueryTemplate::new(
            KV_CACHE_QUERY,
            r#"kv_cache_usage_ratio{namespace="{namespace}",model_id="{modelID}",pod=~"{podRegex}"}"#,
        ))
        .await;
    source
        .register_query(crate::metrics_source::QueryTemplate::new(
            QUEUE_LENGTH_QUERY,
            r#"inference_queue_length{namespace="{namespace}",model_id="{modelID}",pod=~"{podRegex}"}"#,
        ))
        .await;
}

/// Builds the pod-name prefix a variant's replicas are expected to carry:
/// `{scaleTargetName}-`.
fn pod_prefix(variant: &Variant) -> String {
    format!("{}-", variant.scale_target_name)
}

/// Finds which variant (if any) owns `pod_name`, by longest matching
/// prefix — guards against one deployment name being a strict prefix of
/// another's (e.g. `llama-70b` vs `llama-70b-chat`).
fn match_variant<'a>(pod_name: &str, variants: &'a [Variant]) -> Option<&'a Variant> {
    variants
        .iter()
        .filter(|v| pod_name.starts_with(&pod_prefix(v)))
        .max_by_key(|v| v.scale_target_name.len())
}

/// Collects enriched [`ReplicaMetrics`] for every variant of `model_id` in
/// `namespace`, joining the KV-cache and queue-length queries against pod
/// identity.
///
/// Rows whose pod name matches no known variant prefix are silently
/// dropped. Rows older than `staleness_threshold` are dropped
/// before joining. A pod with a fresh sample for only one of the two
/// metrics is still emitted, with the missing field at its zero value and
/// the corresponding `*_known` flag cleared.
#[instrument(skip(source, variants), fields(model_id, namespace, variant_count = variants.len()))]
pub async fn collect(
    source: &MetricsSource,
    model_id: &str,
    namespace: &str,
    variants: &[Variant],
) -> Result<Vec<ReplicaMetrics>> {
    if variants.is_empty() {
        return Ok(Vec::new());
    }

    let namespace = validate_namespace(namespace)
        .map_err(|e| crate::error::AutoscalerError::ParseError(e.to_string()))?;

    let pod_regex = variants
        .iter()
        .map(|v| escape_label_value(&pod_prefix(v)) + ".*")
        .collect::<Vec<_>>()
        .join("|");

    let mut params = BTreeMap::new();
    params.insert("namespace".to_string(), escape_label_value(namespace));
    params.insert("modelID".to_string(), escape_label_value(model_id));
    params.insert("podRegex".to_string(), pod_regex);

    let results = source
        .refresh(
            Some(&[KV_CACHE_QUERY.to_string(), QUEUE_LENGTH_QUERY.to_string()]),
            &params,
        )
        .await?;

    let staleness_threshold = source.config().staleness_threshold;
    let now = Utc::now();

    let kv_rows = results.get(KV_CACHE_QUERY).map(|r| r.rows.as_slice()).unwrap_or_default();
    let queue_rows = results
        .get(QUEUE_LENGTH_QUERY)
        .map(|r| r.rows.as_slice())
        .unwrap_or_default();

    let mut by_pod: HashMap<String, (Option<&MetricRow>, Option<&MetricRow>)> = HashMap::new();
    for row in kv_rows {
        by_pod.entry(row.pod_name.clone()).or_default().0 = Some(row);
    }
    for row in queue_rows {
        by_pod.entry(row.pod_name.clone()).or_default().1 = Some(row);
    }

    let mut replicas = Vec::with_capacity(by_pod.len());
    let mut dropped_stale = 0u32;
    let mut dropped_unknown = 0u32;

    for (pod_name, (kv, queue)) in by_pod {
        let Some(variant) = match_variant(&pod_name, variants) else {
            dropped_unknown += 1;
            continue;
        };

        let kv_fresh = kv.filter(|row| now.signed_duration_since(row.timestamp).to_std().unwrap_or_default() <= staleness_threshold);
        let queue_fresh = queue.filter(|row| now.signed_duration_since(row.timestamp).to_std().unwrap_or_default() <= staleness_threshold);

        if kv.is_some() && kv_fresh.is_none() {
            dropped_stale += 1;
        }
        if queue.is_some() && queue_fresh.is_none() {
            dropped_stale += 1;
        }

        if kv_fresh.is_none() && queue_fresh.is_none() {
            continue;
        }

        let timestamp = kv_fresh
            .map(|r| r.timestamp)
            .or_else(|| queue_fresh.map(|r| r.timestamp))
            .unwrap_or(now);

        replicas.push(ReplicaMetrics {
            pod_name,
            variant_name: variant.name.clone(),
            model_id: model_id.to_string(),
            namespace: namespace.to_string(),
            accelerator_name: variant.accelerator_name.clone(),
            cost: variant.cost,
            kv_cache_usage: kv_fresh.map(|r| r.value).unwrap_or(0.0),
            queue_length: queue_fresh.map(|r| r.value.round().max(0.0) as u32).unwrap_or(0),
            kv_cache_known: kv_fresh.is_some(),
            queue_known: queue_fresh.is_some(),
            timestamp,
        });
    }

    if dropped_unknown > 0 {
        warn!(dropped_unknown, "dropped rows with unmatched pod prefixes");
    }
    if dropped_stale > 0 {
        debug!(dropped_stale, threshold = ?staleness_threshold, "dropped stale metric samples");
    }

    Ok(replicas)
}
