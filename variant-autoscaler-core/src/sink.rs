//! Target metric publication.
//!
//! The downstream autoscaler consumes the desired replica count as a gauge,
//! not as a field it reads off the variant object. [`MetricSink`] abstracts
//! that publication so the reconciler never depends on a concrete metrics
//! registry.

use prometheus::{GaugeVec, Opts, Registry};

use crate::error::{AutoscalerError, Result};

/// Labels identifying one published target-metric series.
#[derive(Debug, Clone)]
pub struct MetricLabels<'a> {
    /// Namespace the variant lives in.
    pub namespace: &'a str,
    /// Variant name.
    pub variant_name: &'a str,
    /// Model identity.
    pub model_id: &'a str,
    /// Accelerator type.
    pub accelerator_name: &'a str,
    /// Controller-instance tag, when this core is one of several sharing a
    /// cluster.
    pub controller_instance: Option<&'a str>,
}

/// Publishes the desired replica count for a variant to whatever system the
/// downstream autoscaler reads from.
pub trait MetricSink: Send + Sync {
    /// Sets the published target for one variant. Implementations should
    /// treat this as a plain set (overwrite), not an increment.
    fn set_target(&self, labels: MetricLabels<'_>, target_replicas: u32) -> Result<()>;
}

/// A [`MetricSink`] backed by a `prometheus::GaugeVec`, scraped by the
/// downstream autoscaler's metrics pipeline.
pub struct PrometheusMetricSink {
    gauge: GaugeVec,
}

impl PrometheusMetricSink {
    /// Registers the `desired_replicas` gauge on `registry` under the given
    /// metric name.
    pub fn new(registry: &Registry, metric_name: &str) -> Result<Self> {
        let gauge = GaugeVec::new(
            Opts::new(metric_name, "Desired replica count published by the autoscaling decision core"),
            &[
                "namespace",
                "variant_name",
                "model_id",
                "accelerator_name",
                "controller_instance",
            ],
        )
        .map_err(|e| AutoscalerError::Internal(anyhow::anyhow!(e)))?;

        registry
            .register(Box::new(gauge.clone()))
            .map_err(|e| AutoscalerError::Internal(anyhow::anyhow!(e)))?;

        Ok(Self { gauge })
    }
}

impl MetricSink for PrometheusMetricSink {
    fn set_target(&self, labels: MetricLabels<'_>, target_replicas: u32) -> Result<()> {
        let controller_instance = labels.controller_instance.unwrap_or("");
        self.gauge
            .with_label_values(&[
                labels.namespace,
                labels.variant_name,
                labels.model_id,
                labels.accelerator_name,
                controller_instance,
            ])
            .set(f64::from(target_replicas));
        Ok(())
    }
}
