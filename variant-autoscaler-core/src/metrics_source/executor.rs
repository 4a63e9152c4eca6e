//! Query registry and parameterized execution against a pluggable
//! time-series back-end.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::error::{AutoscalerError, Result};

use super::cache::{cache_key, MetricsSourceConfig, TtlCache};
use super::escape::escape_label_value;

/// A named query template with `{placeholder}` parameters, registered once
/// at startup.
///
/// Rendering replaces each `{name}` placeholder with its escaped parameter
/// value (see [`escape_label_value`]); callers must escape (and, for
/// namespaces, validate) every parameter themselves before calling
/// [`MetricsSource::refresh`] — the executor never does it on their behalf.
#[derive(Debug, Clone)]
pub struct QueryTemplate {
    /// Registry name this template is looked up by.
    pub name: String,
    /// The template string, containing `{placeholder}` markers.
    pub template: String,
}

impl QueryTemplate {
    /// Builds a named template.
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
        }
    }

    /// Substitutes `{key}` placeholders with their (already-escaped) values.
    /// Placeholders without a supplied value are left untouched, so a
    /// caller omitting a parameter surfaces as an obviously malformed
    /// rendered query rather than a silent empty-string substitution.
    fn render(&self, params: &BTreeMap<String, String>) -> String {
        let mut rendered = self.template.clone();
        for (key, value) in params {
            rendered = rendered.replace(&format!("{{{key}}}"), value);
        }
        rendered
    }
}

/// One row returned by a query execution: a single time-series sample
/// joined against its originating pod.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRow {
    /// Pod label value the sample is attributed to.
    pub pod_name: String,
    /// The sample's numeric value.
    pub value: f64,
    /// The sample's own timestamp, as reported by the back-end (not query
    /// time).
    pub timestamp: DateTime<Utc>,
}

/// The result of one query execution: every row it returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricResult {
    /// Rows returned by the query.
    pub rows: Vec<MetricRow>,
}

/// Capability set a concrete time-series back-end must provide. The
/// decision core depends only on this trait, never on a specific query
/// language or client.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Executes an already-rendered query string and returns its rows.
    /// Implementations should map network/5xx/timeout failures to
    /// [`AutoscalerError::BackendUnavailable`] or
    /// [`AutoscalerError::Timeout`], and query-syntax/auth failures to
    /// [`AutoscalerError::ParseError`].
    async fn execute(&self, rendered_query: &str) -> Result<MetricResult>;
}

/// Templated query registry, parameterized execution, and TTL cache.
///
/// `refresh` is the sole writer of the cache; `get` is a pure read that
/// never touches the back-end. A 1s background sweep bounds cache memory
/// independently of lookup traffic.
pub struct MetricsSource {
    templates: Arc<RwLock<HashMap<String, QueryTemplate>>>,
    cache: TtlCache,
    executor: Arc<dyn QueryExecutor>,
    config: MetricsSourceConfig,
    _sweeper: tokio::task::JoinHandle<()>,
}

impl MetricsSource {
    /// Builds a metrics source over `executor`, starting its background
    /// cache sweeper immediately.
    pub fn new(executor: Arc<dyn QueryExecutor>, config: MetricsSourceConfig) -> Self {
        let cache = TtlCache::new(config.cache_ttl);
        let sweeper = cache.spawn_sweeper();
        Self {
            templates: Arc::new(RwLock::new(HashMap::new())),
            cache,
            executor,
            config,
            _sweeper: sweeper,
        }
    }

    /// The tunables this source was constructed with.
    pub fn config(&self) -> MetricsSourceConfig {
        self.config
    }

    /// Registers `template` under its name. Re-registering the same name
    /// overwrites the previous template (idempotent by name, not content).
    #[instrument(skip(self, template), fields(query = %template.name))]
    pub async fn register_query(&self, template: QueryTemplate) {
        debug!("registering query template");
        self.templates
            .write()
            .await
            .insert(template.name.clone(), template);
    }

    /// Executes `query_names` (or every registered query, if `None`) with
    /// `params`, caching each result under `(query_name, sorted params)`.
    ///
    /// Every parameter value MUST already have passed through
    /// [`escape_label_value`] (and, for a namespace value,
    /// [`super::validate_namespace`]) — this function renders and executes
    /// verbatim and performs no escaping of its own.
    #[instrument(skip(self, params))]
    pub async fn refresh(
        &self,
        query_names: Option<&[String]>,
        params: &BTreeMap<String, String>,
    ) -> Result<HashMap<String, MetricResult>> {
        let templates = self.templates.read().await;
        let selected: Vec<&QueryTemplate> = match query_names {
            Some(names) => names
                .iter()
                .filter_map(|n| templates.get(n))
                .collect(),
            None => templates.values().collect(),
        };

        let mut results = HashMap::with_capacity(selected.len());
        let sorted_params: Vec<(String, String)> = params.clone().into_iter().collect();

        for template in selected {
            let rendered = template.render(params);
            let key = cache_key(&template.name, &sorted_params);

            let exec = tokio::time::timeout(self.config.query_timeout, self.executor.execute(&rendered));
            let result = match exec.await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    warn!(query = %template.name, error = %e, "query execution failed");
                    return Err(e);
                }
                Err(_) => {
                    warn!(query = %template.name, timeout = ?self.config.query_timeout, "query execution timed out");
                    return Err(AutoscalerError::Timeout(format!(
                        "query {} exceeded {:?}",
                        template.name, self.config.query_timeout
                    )));
                }
            };

            self.cache.insert(key.clone(), result.clone()).await;
            results.insert(template.name.clone(), result);
        }

        Ok(results)
    }

    /// Reads a cached result without touching the back-end. Returns `None`
    /// on a cache miss or if the most recent `refresh` for this key is
    /// older than `cache_ttl`.
    pub async fn get(&self, query_name: &str, params: &BTreeMap<String, String>) -> Option<MetricResult> {
        let sorted_params: Vec<(String, String)> = params.clone().into_iter().collect();
        let key = cache_key(query_name, &sorted_params);
        self.cache.get(&key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics_source::fake::FakeQueryExecutor;

    #[test]
    fn render_substitutes_all_placeholders() {
        let template = QueryTemplate::new(
            "kv_cache_usage",
            r#"kv_cache{namespace="{namespace}",model="{modelID}",pod=~"{podRegex}"}"#,
        );
        let mut params = BTreeMap::new();
        params.insert("namespace".to_string(), "prod".to_string());
        params.insert("modelID".to_string(), "llama-70b".to_string());
        params.insert("podRegex".to_string(), "llama-70b-a100-.*".to_string());

        let rendered = template.render(&params);
        assert_eq!(
            rendered,
            r#"kv_cache{namespace="prod",model="llama-70b",pod=~"llama-70b-a100-.*"}"#
        );
    }

    #[tokio::test]
    async fn refresh_caches_and_get_reads_without_executing() {
        let executor = FakeQueryExecutor::default();
        let row = MetricRow {
            pod_name: "llama-70b-a100-0".to_string(),
            value: 0.42,
            timestamp: Utc::now(),
        };
        let template = QueryTemplate::new("q", "q{ns=\"{namespace}\"}");
        executor.stage_ok(r#"q{ns="prod"}"#, vec![row.clone()]);

        let source = MetricsSource::new(Arc::new(executor), MetricsSourceConfig::default());
        source.register_query(template).await;

        let mut params = BTreeMap::new();
        params.insert("namespace".to_string(), "prod".to_string());

        let refreshed = source.refresh(None, &params).await.unwrap();
        assert_eq!(refreshed["q"].rows, vec![row.clone()]);

        let cached = source.get("q", &params).await.unwrap();
        assert_eq!(cached.rows, vec![row]);
    }

    #[tokio::test]
    async fn get_misses_for_unrefreshed_params() {
        let executor = FakeQueryExecutor::default();
        let source = MetricsSource::new(Arc::new(executor), MetricsSourceConfig::default());
        source
            .register_query(QueryTemplate::new("q", "q{ns=\"{namespace}\"}"))
            .await;

        let mut params = BTreeMap::new();
        params.insert("namespace".to_string(), "staging".to_string());
        assert!(source.get("q", &params).await.is_none());
    }

    #[tokio::test]
    async fn refresh_surfaces_backend_error() {
        let executor = FakeQueryExecutor::default();
        let source = MetricsSource::new(Arc::new(executor), MetricsSourceConfig::default());
        source
            .register_query(QueryTemplate::new("q", "q{ns=\"{namespace}\"}"))
            .await;
        let mut params = BTreeMap::new();
        params.insert("namespace".to_string(), "prod".to_string());

        let err = source.refresh(None, &params).await.unwrap_err();
        assert!(matches!(err, AutoscalerError::BackendUnavailable(_)));
    }
}
