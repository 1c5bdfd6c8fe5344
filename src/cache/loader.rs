//! Loader Module
//!
//! Cache-miss loaders and the per-key deduplication of in-flight loads.
//!
//! While a load for a key is running, later misses on the same key join it
//! instead of starting their own: they wait on the same [`OnceCell`] and all
//! receive the one result. Once the load has resolved the key is dropped from
//! the in-flight map, so the next miss starts a fresh load.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;

use crate::cache::Ttl;
use crate::error::Result;

/// Future returned by a loader.
pub type LoaderFuture<V> = Pin<Box<dyn Future<Output = anyhow::Result<(V, Ttl)>> + Send>>;

/// Outcome of a load as seen by every waiting caller: value and remaining TTL.
pub(crate) type LoadResult<V> = Result<(V, Duration)>;

// == Loader ==
/// Computes the value for a key on a cache miss.
///
/// The loader returns the value and the TTL to store it with.
pub struct Loader<V> {
    load: Arc<dyn Fn(String) -> LoaderFuture<V> + Send + Sync>,
}

impl<V: 'static> Loader<V> {
    /// Wraps an async function as a loader.
    ///
    /// # Example
    /// ```ignore
    /// let loader = Loader::new(|key: String| async move {
    ///     Ok::<_, anyhow::Error>((format!("value for {key}"), Ttl::After(Duration::from_secs(30))))
    /// });
    /// ```
    pub fn new<F, Fut>(load: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<(V, Ttl)>> + Send + 'static,
    {
        Self {
            load: Arc::new(move |key: String| -> LoaderFuture<V> { Box::pin(load(key)) }),
        }
    }

    pub(crate) fn load(&self, key: String) -> LoaderFuture<V> {
        (self.load)(key)
    }
}

impl<V> Clone for Loader<V> {
    fn clone(&self) -> Self {
        Self {
            load: Arc::clone(&self.load),
        }
    }
}

impl<V> fmt::Debug for Loader<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader").finish_non_exhaustive()
    }
}

// == Pending Load ==
/// Handle on an in-flight load shared by every caller that missed on `key`.
pub(crate) struct PendingLoad<V> {
    key: String,
    call: Arc<OnceCell<LoadResult<V>>>,
}

impl<V: Clone> PendingLoad<V> {
    /// Runs `load` if no one else has, otherwise waits for the running load.
    pub(crate) async fn resolve<F, Fut>(&self, load: F) -> LoadResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = LoadResult<V>>,
    {
        self.call.get_or_init(load).await.clone()
    }
}

// == In-Flight Loads ==
/// Map of keys with a load currently in flight. Lives under the cache lock.
pub(crate) struct InFlight<V> {
    calls: HashMap<String, Arc<OnceCell<LoadResult<V>>>>,
}

impl<V> Default for InFlight<V> {
    fn default() -> Self {
        Self {
            calls: HashMap::new(),
        }
    }
}

impl<V> fmt::Debug for InFlight<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlight")
            .field("keys", &self.calls.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<V> InFlight<V> {
    // == Join ==
    /// Returns the pending load for `key`, registering a new one if none is in flight.
    ///
    /// A load that already resolved but has not been completed yet is replaced,
    /// so a late miss never receives a stale outcome.
    pub(crate) fn join(&mut self, key: &str) -> PendingLoad<V> {
        let call = self.calls.entry(key.to_owned()).or_default();
        if call.initialized() {
            *call = Arc::default();
        }
        PendingLoad {
            key: key.to_owned(),
            call: Arc::clone(call),
        }
    }

    // == Complete ==
    /// Forgets the pending load once resolved. A newer load for the same key is left alone.
    pub(crate) fn complete(&mut self, pending: &PendingLoad<V>) {
        let is_current = self
            .calls
            .get(&pending.key)
            .is_some_and(|call| Arc::ptr_eq(call, &pending.call));
        if is_current {
            self.calls.remove(&pending.key);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }
}
