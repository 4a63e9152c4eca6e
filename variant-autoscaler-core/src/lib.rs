//! # Variant Autoscaler Decision Core
//!
//! A saturation-aware autoscaling decision core for fleets of LLM inference
//! variants sharing an accelerator pool. Given per-replica KV-cache and
//! queue-length telemetry, this crate decides — for every (model,
//! namespace, accelerator) scaling domain — whether the group should grow
//! or shrink by exactly one replica, and which of its variants absorbs
//! that change, favoring the cheapest variant on scale-up and the most
//! expensive on scale-down.
//!
//! ## Architecture
//!
//! ```text
//! Metrics Source ──► Collector ──► Analyzer ──► Planner ──► Engine
//!                                                              │
//!                                                    writes    ▼
//!                                              Decision Cache + Trigger Bus
//!                                                              │
//!                                                     wakes    ▼
//!                                                         Reconciler ──► status patch + target metric
//! ```
//!
//! The [`engine::Engine`] runs a periodic tick: it lists active variants,
//! groups them by scaling domain, collects and analyzes their metrics, and
//! writes one [`types::VariantDecision`] per variant to the shared
//! [`cache::DecisionCache`]. The [`reconciler::Reconciler`] is woken
//! through the [`cache::TriggerSender`] bus and is the only component that
//! ever touches the object store's status subresource or the downstream
//! metric sink — this keeps analysis and publication from racing each
//! other over the same API object.
//!
//! On a metrics-collection failure, the engine falls back to publishing a
//! safety-net decision rather than leaving a variant's target stale or
//! absent.
//!
//! This crate depends only on the [`store::ObjectStore`],
//! [`metrics_source::QueryExecutor`], and [`sink::MetricSink`] traits —
//! never on a concrete cluster client or time-series backend — so it can
//! be exercised entirely with the in-memory fakes under each module's
//! `#[cfg(test)]` `fake` submodule.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod analyze;
pub mod cache;
pub mod collector;
pub mod engine;
pub mod error;
pub mod metrics_source;
pub mod planner;
pub mod reconciler;
pub mod retry;
pub mod sink;
pub mod store;
pub mod types;

pub use cache::{new_trigger_bus, DecisionCache, TriggerSender, VariantKey, WakeUp};
pub use engine::Engine;
pub use error::{AutoscalerError, Result};
pub use reconciler::Reconciler;
pub use sink::{MetricLabels, MetricSink, PrometheusMetricSink};
pub use store::{DeploymentStatus, ObjectStore, WatchEvent};
pub use types::{
    GroupKey, ModelSaturationAnalysis, Replica, ReplicaMetrics, ScalingAction, Variant,
    VariantDecision, VariantReplicaState, VariantSaturationAnalysis,
};

/// Crate version, aligned with the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
