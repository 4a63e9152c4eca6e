//! Decision cache and trigger bus: the concurrency-safe handoff between the
//! optimization loop and the reconciler.
//!
//! The loop is the cache's sole writer; reconcilers are many concurrent
//! readers. There is no compare-and-swap and no TTL — entries are
//! monotonically overwritten by whichever cycle ran most recently, and the
//! reconciler never deletes what it reads. The trigger bus carries only
//! identity, never the decision itself, so a reconciler always re-reads
//! the cache on wake rather than trusting a value that might already be
//! stale by the time it runs.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace, warn};

use crate::types::VariantDecision;

/// Identity of one variant, used as the decision-cache key and the
/// trigger-bus payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariantKey {
    /// Namespace the variant lives in.
    pub namespace: String,
    /// Variant name.
    pub name: String,
}

impl VariantKey {
    /// Builds a key from borrowed strings.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// Thread-safe `(namespace, name) -> VariantDecision` map. One writer (the
/// engine), many readers (reconcilers). Memory is bounded by the number of
/// distinct variants ever decided, since entries are overwritten in place
/// rather than accumulated.
#[derive(Clone, Default)]
pub struct DecisionCache {
    entries: Arc<RwLock<HashMap<VariantKey, VariantDecision>>>,
}

impl DecisionCache {
    /// Builds an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the entry for `key` with `decision`. The previous value,
    /// if any, is dropped; callers never need to merge.
    pub async fn set(&self, key: VariantKey, decision: VariantDecision) {
        trace!(namespace = %key.namespace, variant = %key.name, "writing decision cache entry");
        self.entries.write().await.insert(key, decision);
    }

    /// Reads the current entry for `key`, or `None` if no cycle has ever
    /// written one.
    pub async fn get(&self, key: &VariantKey) -> Option<VariantDecision> {
        self.entries.read().await.get(key).cloned()
    }

    /// Number of distinct variants currently cached. Exposed for
    /// diagnostics and tests, not part of the read/write contract.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// A wake-up event: "re-reconcile this variant, a fresh decision is
/// available."  Carries only identity; the payload is always read back out
/// of the [`DecisionCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeUp(pub VariantKey);

/// Bounded, non-blocking sender half of the trigger bus. Send failures
/// (full buffer or a dropped receiver) are logged and swallowed — a missed
/// wake-up is recovered by the next tick's wake-ups or the reconciler's
/// own periodic resync, never a fatal condition for the loop.
#[derive(Clone)]
pub struct TriggerSender {
    tx: mpsc::Sender<WakeUp>,
}

impl TriggerSender {
    /// Attempts a non-blocking send. A full buffer coalesces duplicate
    /// wake-ups for an already-notified variant: drop and let the
    /// already-queued wake-up (or a future tick) cover it.
    pub fn notify(&self, key: VariantKey) {
        match self.tx.try_send(WakeUp(key.clone())) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(namespace = %key.namespace, variant = %key.name, "trigger bus full; coalescing wake-up");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(namespace = %key.namespace, variant = %key.name, "trigger bus receiver dropped; wake-up lost");
            }
        }
    }
}

/// Builds a decision cache and trigger bus pair, with the bus sized to
/// `2 * expected_variant_count`, the buffer headroom that lets one full
/// group's worth of wake-ups land without coalescing under normal
/// operation.
pub fn new_trigger_bus(expected_variant_count: usize) -> (TriggerSender, mpsc::Receiver<WakeUp>) {
    let capacity = (expected_variant_count * 2).max(1);
    let (tx, rx) = mpsc::channel(capacity);
    (TriggerSender { tx }, rx)
}
