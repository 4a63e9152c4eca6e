//! TTL cache backing the metrics source and its tunables.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;

use super::executor::MetricResult;

const DEFAULT_CACHE_TTL_SECS: u64 = 30;
const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 10;
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Tunables for the metrics source: how long a cached result is considered
/// fresh, how old a sample may be before collection discards it, and the
/// per-query execution budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSourceConfig {
    /// How long a `refresh` result remains servable from cache.
    pub cache_ttl: Duration,
    /// How old a time-series sample's own timestamp may be before the
    /// collector discards it. Defaults to `2 * cache_ttl`.
    pub staleness_threshold: Duration,
    /// Per-query execution timeout.
    pub query_timeout: Duration,
}

impl Default for MetricsSourceConfig {
    fn default() -> Self {
        let cache_ttl = Duration::from_secs(DEFAULT_CACHE_TTL_SECS);
        Self {
            cache_ttl,
            staleness_threshold: cache_ttl * 2,
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }
}

/// One cached query result plus the instant it was written.
#[derive(Debug, Clone)]
pub(super) struct CacheEntry {
    pub(super) value: MetricResult,
    pub(super) written_at: Instant,
}

/// A single-writer, many-reader TTL cache keyed by rendered query key.
///
/// The metrics source is the sole writer (via `refresh`); the collector and
/// any diagnostics endpoint are readers. A background sweeper evicts
/// expired entries on a fixed tick so memory stays bounded even for query
/// keys that are never looked up again.
pub(super) struct TtlCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    ttl: Duration,
}

impl TtlCache {
    pub(super) fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub(super) async fn insert(&self, key: String, value: MetricResult) {
        self.entries.write().await.insert(
            key,
            CacheEntry {
                value,
                written_at: Instant::now(),
            },
        );
    }

    /// Returns the cached value if present and not expired; a miss or an
    /// expired entry both yield `None` without removing anything (the
    /// sweeper owns eviction).
    pub(super) async fn get(&self, key: &str) -> Option<MetricResult> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.written_at.elapsed() > self.ttl {
            None
        } else {
            Some(entry.value.clone())
        }
    }

    /// Spawns the 1s background sweep tick that bounds cache memory by
    /// evicting entries nobody has refreshed recently. Returns a handle the
    /// owner can abort on shutdown.
    pub(super) fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let entries = Arc::clone(&self.entries);
        let ttl = self.ttl;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let mut guard = entries.write().await;
                let before = guard.len();
                guard.retain(|_, entry| entry.written_at.elapsed() <= ttl);
                let evicted = before - guard.len();
                if evicted > 0 {
                    debug!(evicted, remaining = guard.len(), "swept expired metrics cache entries");
                }
            }
        })
    }
}

/// Builds the canonical cache key for `(query_name, params)`: params are
/// sorted by key so that identical parameter sets always hash the same
/// regardless of caller-supplied ordering.
pub(super) fn cache_key(query_name: &str, params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let mut key = String::from(query_name);
    for (k, v) in sorted {
        key.push('\u{1}');
        key.push_str(k);
        key.push('=');
        key.push_str(v);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_order_independent() {
        let a = cache_key(
            "kv_cache_usage",
            &[
                ("namespace".into(), "prod".into()),
                ("modelID".into(), "m1".into()),
            ],
        );
        let b = cache_key(
            "kv_cache_usage",
            &[
                ("modelID".into(), "m1".into()),
                ("namespace".into(), "prod".into()),
            ],
        );
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn get_misses_after_ttl_elapses() {
        let cache = TtlCache::new(Duration::from_millis(20));
        cache
            .insert("k".to_string(), MetricResult { rows: vec![] })
            .await;
        assert!(cache.get("k").await.is_some());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("k").await.is_none());
    }
}
