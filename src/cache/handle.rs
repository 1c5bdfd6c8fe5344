//! Cache Handle Module
//!
//! The public, cloneable [`Cache`] handle. Every operation takes the single
//! cache lock for its map/heap work; loaders run outside the lock through the
//! per-key deduplication layer and store their result via the normal set path.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tracing::{debug, info};

use crate::cache::loader::Loader;
use crate::cache::store::CacheStore;
use crate::cache::{EvictionReason, Metrics, Ttl};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::tasks::{spawn_expiration_task, ShutdownRequest};

struct Shared<V> {
    store: Arc<Mutex<CacheStore<V>>>,
    /// Wakes the expiration scheduler (root or configuration changed)
    wakeup: Arc<Notify>,
    shutdown: mpsc::Sender<ShutdownRequest>,
}

// == Cache ==
/// Concurrency-safe key-value cache with TTL expiration.
///
/// Cloning is cheap and every clone operates on the same cache. Creating a
/// cache spawns its expiration scheduler, so it must happen inside a Tokio
/// runtime. Dropping the last handle without calling [`Cache::close`] stops
/// the scheduler as well.
///
/// # Example
/// ```ignore
/// let cache: Cache<String> = Cache::new();
/// cache.set_ttl(Duration::from_secs(60)).await?;
/// cache.set("session", "abc".to_string()).await?;
/// let value = cache.get("session").await?;
/// cache.close().await?;
/// ```
pub struct Cache<V> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for Cache<V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V> fmt::Debug for Cache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache").finish_non_exhaustive()
    }
}

impl<V> Default for Cache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Cache<V>
where
    V: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates a cache with no global TTL, no size limit and touch-on-read.
    pub fn new() -> Self {
        Self::with_config(&CacheConfig::default())
    }

    /// Creates a cache from configuration and starts its expiration scheduler.
    pub fn with_config(config: &CacheConfig) -> Self {
        let wakeup = Arc::new(Notify::new());
        let store = Arc::new(Mutex::new(CacheStore::new(config, Arc::clone(&wakeup))));
        let (shutdown, requests) = mpsc::channel(1);

        spawn_expiration_task(Arc::downgrade(&store), Arc::clone(&wakeup), requests);

        Self {
            shared: Arc::new(Shared {
                store,
                wakeup,
                shutdown,
            }),
        }
    }

    // == Set ==
    /// Stores `value` under `key` using the global TTL.
    pub async fn set(&self, key: impl Into<String>, value: V) -> Result<()> {
        self.set_with_ttl(key, value, Ttl::Global).await
    }

    /// Stores `value` under `key` with its own TTL.
    ///
    /// Replacing an existing key updates its value and TTL and restarts its
    /// clock. Inserting a new key into a full cache first evicts the entry
    /// closest to expiring.
    pub async fn set_with_ttl(
        &self,
        key: impl Into<String>,
        value: V,
        ttl: impl Into<Ttl>,
    ) -> Result<()> {
        self.insert(key.into(), value, ttl.into()).await.map(|_| ())
    }

    /// Shared write path. Returns the remaining TTL of the stored entry.
    async fn insert(&self, key: String, value: V, ttl: Ttl) -> Result<Duration> {
        let (notice, remaining) = {
            let mut store = self.shared.store.lock().await;
            let inserted = store.set(key.clone(), value, ttl)?;
            let notice = match store.new_item_callback() {
                Some(callback) if inserted => store.value(&key).cloned().map(|v| (callback, v)),
                _ => None,
            };
            (notice, store.remaining(&key))
        };
        if let Some((callback, value)) = notice {
            callback(&key, &value);
        }
        Ok(remaining)
    }

    // == Get ==
    /// Looks up `key`, invoking the configured loader on a miss.
    pub async fn get(&self, key: &str) -> Result<V> {
        self.get_by_loader(key, None).await.map(|(value, _)| value)
    }

    /// Like [`Cache::get`], also returning the remaining TTL (zero for entries
    /// that do not expire).
    pub async fn get_with_ttl(&self, key: &str) -> Result<(V, Duration)> {
        self.get_by_loader(key, None).await
    }

    /// Looks up `key`, using `loader` (or else the configured loader) on a miss.
    ///
    /// Concurrent misses on the same key share one loader invocation and all
    /// receive its outcome. A loader error is returned to every waiter and is
    /// not cached.
    pub async fn get_by_loader(
        &self,
        key: &str,
        loader: Option<&Loader<V>>,
    ) -> Result<(V, Duration)> {
        let (pending, loader) = {
            let mut store = self.shared.store.lock().await;
            match store.get(key) {
                Err(CacheError::NotFound(_)) => {}
                result => return result,
            }
            let Some(loader) = loader.or(store.loader()).cloned() else {
                return Err(CacheError::NotFound(key.to_owned()));
            };
            (store.in_flight_mut().join(key), loader)
        };

        let loader = &loader;
        let result = pending
            .resolve(move || async move {
                debug!(key, "loading missing key");
                let (value, ttl) = loader.load(key.to_owned()).await?;
                let remaining = self.insert(key.to_owned(), value.clone(), ttl).await?;
                Ok::<_, CacheError>((value, remaining))
            })
            .await;

        self.shared.store.lock().await.in_flight_mut().complete(&pending);
        result
    }

    // == Remove ==
    /// Removes `key`, firing eviction callbacks with [`EvictionReason::Removed`].
    pub async fn remove(&self, key: &str) -> Result<()> {
        self.shared.store.lock().await.remove(key)
    }

    // == Touch ==
    /// Restarts the expiration clock of `key` without reading it.
    pub async fn touch(&self, key: &str) -> Result<()> {
        self.shared.store.lock().await.touch(key)
    }

    // == Purge ==
    /// Removes every entry without firing callbacks.
    ///
    /// Purged entries are counted under `evicted_closed`.
    pub async fn purge(&self) -> Result<()> {
        let mut store = self.shared.store.lock().await;
        if store.is_closed() {
            return Err(CacheError::Closed);
        }
        let purged = store.purge();
        debug!(purged, "cache purged");
        Ok(())
    }

    // == Close ==
    /// Stops the expiration scheduler, which evicts the remaining entries with
    /// [`EvictionReason::Closed`], then purges.
    ///
    /// Only the first call succeeds; later calls return [`CacheError::Closed`].
    /// Eviction callbacks spawned during shutdown may still be running when
    /// this returns.
    pub async fn close(&self) -> Result<()> {
        self.shared.store.lock().await.close()?;

        let (ack, done) = oneshot::channel();
        if self.shared.shutdown.send(ack).await.is_ok() {
            let _ = done.await;
        }

        let purged = self.shared.store.lock().await.purge();
        info!(purged, "cache closed");
        Ok(())
    }

    // == Configuration ==
    /// Sets the global TTL used by entries stored with [`Ttl::Global`].
    /// A zero duration removes it.
    pub async fn set_ttl(&self, ttl: Duration) -> Result<()> {
        self.shared.store.lock().await.set_global_ttl(ttl)?;
        self.shared.wakeup.notify_waiters();
        Ok(())
    }

    /// Bounds the number of live entries; 0 means unbounded.
    pub async fn set_cache_size_limit(&self, limit: usize) {
        self.shared.store.lock().await.set_size_limit(limit);
    }

    /// When `skip` is true, reads no longer extend an entry's expiration.
    pub async fn skip_ttl_extension_on_hit(&self, skip: bool) {
        self.shared.store.lock().await.set_skip_ttl_extension(skip);
    }

    /// Sets the loader used on cache misses.
    pub async fn set_loader_function(&self, loader: Loader<V>) {
        self.shared.store.lock().await.set_loader(loader);
    }

    /// Called on every eviction, whatever the reason.
    pub async fn set_expiration_callback<F>(&self, callback: F)
    where
        F: Fn(&str, &V) + Send + Sync + 'static,
    {
        self.shared.store.lock().await.callbacks_mut().expire = Some(Arc::new(callback));
    }

    /// Called on every eviction with the reason.
    pub async fn set_expiration_reason_callback<F>(&self, callback: F)
    where
        F: Fn(&str, EvictionReason, &V) + Send + Sync + 'static,
    {
        self.shared.store.lock().await.callbacks_mut().expire_reason = Some(Arc::new(callback));
    }

    /// Consulted under the cache lock before an entry expires. Returning
    /// `false` renews the entry instead. The callback must not block.
    pub async fn set_check_expiration_callback<F>(&self, callback: F)
    where
        F: Fn(&str, &V) -> bool + Send + Sync + 'static,
    {
        self.shared.store.lock().await.callbacks_mut().check_expire = Some(Arc::new(callback));
    }

    /// Called after a previously absent key has been stored.
    pub async fn set_new_item_callback<F>(&self, callback: F)
    where
        F: Fn(&str, &V) + Send + Sync + 'static,
    {
        self.shared.store.lock().await.callbacks_mut().new_item = Some(Arc::new(callback));
    }

    // == Views ==
    /// Keys currently stored; empty once closed.
    pub async fn get_keys(&self) -> Vec<String> {
        self.shared.store.lock().await.keys()
    }

    /// Number of entries currently stored; zero once closed.
    pub async fn count(&self) -> usize {
        self.shared.store.lock().await.len()
    }

    /// Snapshot of the cache counters.
    pub async fn get_metrics(&self) -> Metrics {
        self.shared.store.lock().await.metrics()
    }
}
