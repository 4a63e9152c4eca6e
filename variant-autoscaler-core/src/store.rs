//! Generic object-store abstraction.
//!
//! The decision core never depends on a concrete cluster API client. Every
//! read of a variant or deployment, and every status patch, goes through
//! this trait, so the core can be tested against an in-memory fake and
//! wired against any real client at the integration edge.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

/// Minimal description of a deployment's replica bookkeeping, as read from
/// the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct DeploymentStatus {
    /// Replicas the deployment spec currently requests.
    pub current_replicas: u32,
    /// Replicas the deployment reports ready.
    pub ready_replicas: u32,
}

/// A watch event emitted by [`ObjectStore::watch`].
#[derive(Debug, Clone)]
pub enum WatchEvent<T> {
    /// An object was created.
    Created(T),
    /// An object was updated; carries the new value.
    Updated(T),
    /// An object identified by `namespace`/`name` was deleted.
    Deleted { namespace: String, name: String },
}

/// Generic get/list/watch/patch capability over a cluster API, parameterized
/// by the Rust type representing the object kind.
///
/// Implementations are expected to be cheap to clone (e.g. wrapping a
/// connection-pooled client) since one is held by both the engine and every
/// reconciler task.
#[async_trait]
pub trait ObjectStore<T>: Send + Sync
where
    T: Send + Sync + Serialize + DeserializeOwned + 'static,
{
    /// Fetches a single object by namespace and name.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<T>>;

    /// Lists objects in `namespace`, optionally restricted to those carrying
    /// `label_selector` (an opaque, backend-specific selector string).
    async fn list(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<T>>;

    /// Lists objects across every namespace, optionally restricted by
    /// `label_selector`. Used by the engine to enumerate active variants
    /// cluster-wide, optionally scoped to one controller instance's label
    /// value.
    async fn list_all(&self, label_selector: Option<&str>) -> Result<Vec<T>>;

    /// Subscribes to create/update/delete events for this object kind. The
    /// returned stream is expected to run until the process shuts down;
    /// callers do not re-establish it themselves.
    async fn watch(
        &self,
        namespace: &str,
    ) -> Result<tokio::sync::mpsc::Receiver<WatchEvent<T>>>;

    /// Applies a JSON merge-patch to the object's status subresource.
    async fn patch_status(&self, namespace: &str, name: &str, patch: serde_json::Value) -> Result<()>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    //! An in-memory [`ObjectStore`] used by engine and reconciler tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::{mpsc, RwLock};

    /// An in-memory object store keyed by `(namespace, name)`, suitable for
    /// driving full engine/reconciler cycles in tests without a real
    /// cluster.
    #[derive(Clone)]
    pub struct FakeObjectStore<T> {
        objects: Arc<RwLock<HashMap<(String, String), T>>>,
        patches: Arc<RwLock<Vec<(String, String, serde_json::Value)>>>,
    }

    impl<T> Default for FakeObjectStore<T> {
        fn default() -> Self {
            Self {
                objects: Arc::new(RwLock::new(HashMap::new())),
                patches: Arc::new(RwLock::new(Vec::new())),
            }
        }
    }

    impl<T: Clone> FakeObjectStore<T> {
        /// Seeds the store with one object.
        pub async fn insert(&self, namespace: &str, name: &str, value: T) {
            self.objects
                .write()
                .await
                .insert((namespace.to_string(), name.to_string()), value);
        }

        /// Returns every status patch recorded via `patch_status`, in order.
        pub async fn recorded_patches(&self) -> Vec<(String, String, serde_json::Value)> {
            self.patches.read().await.clone()
        }
    }

    #[async_trait]
    impl<T> ObjectStore<T> for FakeObjectStore<T>
    where
        T: Send + Sync + Clone + Serialize + DeserializeOwned + 'static,
    {
        async fn get(&self, namespace: &str, name: &str) -> Result<Option<T>> {
            Ok(self
                .objects
                .read()
                .await
                .get(&(namespace.to_string(), name.to_string()))
                .cloned())
        }

        async fn list(&self, namespace: &str, _label_selector: Option<&str>) -> Result<Vec<T>> {
            Ok(self
                .objects
                .read()
                .await
                .iter()
                .filter(|((ns, _), _)| ns == namespace)
                .map(|(_, v)| v.clone())
                .collect())
        }

        async fn list_all(&self, _label_selector: Option<&str>) -> Result<Vec<T>> {
            Ok(self.objects.read().await.values().cloned().collect())
        }

        async fn watch(&self, _namespace: &str) -> Result<mpsc::Receiver<WatchEvent<T>>> {
            // Tests that need live watch events construct their own channel
            // and drive it directly; this fake never emits on its own.
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }

        async fn patch_status(
            &self,
            namespace: &str,
            name: &str,
            patch: serde_json::Value,
        ) -> Result<()> {
            self.patches
                .write()
                .await
                .push((namespace.to_string(), name.to_string(), patch));
            Ok(())
        }
    }
}
