//! Templated, parameter-escaped query execution against a time-series
//! back-end, with TTL caching and staleness filtering.
//!
//! The decision core never depends on a concrete metrics back-end or query
//! language. Queries are registered once as named templates; every
//! execution substitutes escaped parameters and caches the result under
//! `(query_name, sorted params)` so that repeated lookups within a TTL
//! window (default 30s, see [`MetricsSourceConfig::cache_ttl`]) are served
//! from memory instead of round-tripping to the back-end.

mod cache;
mod escape;
mod executor;

pub use cache::MetricsSourceConfig;
pub use escape::{escape_label_value, validate_namespace, EscapeError};
pub use executor::{MetricResult, MetricRow, MetricsSource, QueryExecutor, QueryTemplate};

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    //! An in-memory [`QueryExecutor`] used by collector and engine tests.

    use super::executor::{MetricResult, MetricRow, QueryExecutor};
    use crate::error::{AutoscalerError, Result};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// A canned executor: returns whatever rows were staged for a rendered
    /// query string, or an error if one was staged instead.
    #[derive(Clone, Default)]
    pub struct FakeQueryExecutor {
        responses: Arc<Mutex<HashMap<String, std::result::Result<Vec<MetricRow>, String>>>>,
    }

    impl FakeQueryExecutor {
        /// Stage a successful response for a given rendered query string.
        pub fn stage_ok(&self, rendered_query: impl Into<String>, rows: Vec<MetricRow>) {
            self.responses
                .lock()
                .unwrap()
                .insert(rendered_query.into(), Ok(rows));
        }

        /// Stage a failure for a given rendered query string.
        pub fn stage_err(&self, rendered_query: impl Into<String>, message: impl Into<String>) {
            self.responses
                .lock()
                .unwrap()
                .insert(rendered_query.into(), Err(message.into()));
        }
    }

    #[async_trait]
    impl QueryExecutor for FakeQueryExecutor {
        async fn execute(&self, rendered_query: &str) -> Result<MetricResult> {
            match self.responses.lock().unwrap().get(rendered_query) {
                Some(Ok(rows)) => Ok(MetricResult {
                    rows: rows.clone(),
                }),
                Some(Err(msg)) => Err(AutoscalerError::BackendUnavailable(msg.clone())),
                None => Err(AutoscalerError::BackendUnavailable(format!(
                    "no fake response staged for query: {rendered_query}"
                ))),
            }
        }
    }
}
