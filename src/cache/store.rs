//! Cache Store Module
//!
//! The state guarded by the cache lock: the key map, the expiration heap over
//! exactly the live entries, configuration, counters and registered hooks.
//! Every method here runs with the lock held and never awaits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::cache::callbacks::{Callbacks, NewItemCallback};
use crate::cache::loader::{InFlight, Loader};
use crate::cache::{Entry, EvictionReason, ExpirationHeap, Metrics, Ttl};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

/// Scheduler sleep when nothing is due and no global TTL is set.
pub const IDLE_INTERVAL: Duration = Duration::from_secs(3600);

/// Shortest scheduler sleep, used when the root is already due.
pub const MIN_SLEEP: Duration = Duration::from_micros(1);

// == Cache Store ==
#[derive(Debug)]
pub(crate) struct CacheStore<V> {
    entries: HashMap<String, Entry<V>>,
    heap: ExpirationHeap<String>,
    /// Zero = no global TTL
    global_ttl: Duration,
    /// Zero = unbounded
    size_limit: usize,
    skip_ttl_extension: bool,
    closed: bool,
    metrics: Metrics,
    callbacks: Callbacks<V>,
    loader: Option<Loader<V>>,
    in_flight: InFlight<V>,
}

impl<V> CacheStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates an empty store whose heap signals root changes on `notifier`.
    pub(crate) fn new(config: &CacheConfig, notifier: Arc<Notify>) -> Self {
        Self {
            entries: HashMap::new(),
            heap: ExpirationHeap::with_notifier(notifier),
            global_ttl: config.global_ttl,
            size_limit: config.size_limit,
            skip_ttl_extension: config.skip_ttl_extension,
            closed: false,
            metrics: Metrics::new(),
            callbacks: Callbacks::default(),
            loader: None,
            in_flight: InFlight::default(),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(CacheError::Closed)
        } else {
            Ok(())
        }
    }

    // == Set ==
    /// Inserts or replaces `key`. Returns true if the key was absent.
    ///
    /// An existing key (even one that is due but not yet swept) is updated in
    /// place. A new key at capacity first evicts the heap root.
    pub(crate) fn set(&mut self, key: String, value: V, ttl: Ttl) -> Result<bool> {
        self.ensure_open()?;
        let now = Instant::now();

        let inserted = if let Some(entry) = self.entries.get_mut(&key) {
            entry.replace(value, ttl);
            entry.touch(now, self.global_ttl);
            false
        } else {
            if self.size_limit != 0 && self.entries.len() >= self.size_limit {
                if let Some(victim) = self.heap.peek().cloned() {
                    self.evict(victim, EvictionReason::EvictedSize);
                }
            }
            let mut entry = Entry::new(key.clone(), value, ttl);
            entry.touch(now, self.global_ttl);
            self.entries.insert(key.clone(), entry);
            true
        };

        if inserted {
            self.heap.add(&mut self.entries, key);
        } else {
            self.heap.update(&mut self.entries, &key);
        }
        self.metrics.record_insert();
        Ok(inserted)
    }

    // == Get ==
    /// Looks up a live entry, touching it unless TTL extension on hit is
    /// disabled. Returns the value and its remaining TTL.
    pub(crate) fn get(&mut self, key: &str) -> Result<(V, Duration)> {
        self.ensure_open()?;
        let now = Instant::now();

        let Some(entry) = self.entries.get_mut(key).filter(|e| !e.is_expired(now)) else {
            self.metrics.record_miss();
            return Err(CacheError::NotFound(key.to_owned()));
        };
        self.metrics.record_hit();

        let touched = !self.skip_ttl_extension && entry.ttl().resolve(self.global_ttl).is_some();
        if touched {
            entry.touch(now, self.global_ttl);
        }
        let hit = (entry.value().clone(), entry.remaining(now));
        if touched {
            self.heap.update(&mut self.entries, key);
        }
        Ok(hit)
    }

    // == Remove ==
    /// Evicts a live `key` with reason [`EvictionReason::Removed`].
    ///
    /// A due but unswept entry counts as absent and is left for the sweep.
    pub(crate) fn remove(&mut self, key: &str) -> Result<()> {
        self.ensure_open()?;
        let now = Instant::now();
        if !self.entries.get(key).is_some_and(|e| !e.is_expired(now)) {
            return Err(CacheError::NotFound(key.to_owned()));
        }
        self.evict(key.to_owned(), EvictionReason::Removed);
        Ok(())
    }

    // == Touch ==
    /// Restarts the expiration clock of a live entry.
    pub(crate) fn touch(&mut self, key: &str) -> Result<()> {
        self.ensure_open()?;
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => entry.touch(now, self.global_ttl),
            _ => return Err(CacheError::NotFound(key.to_owned())),
        }
        self.heap.update(&mut self.entries, key);
        Ok(())
    }

    // == Purge ==
    /// Drops every entry without firing hooks. All of them are counted as
    /// closed evictions. Returns the number dropped.
    pub(crate) fn purge(&mut self) -> usize {
        let count = self.entries.len();
        self.metrics.record_purge(count);
        self.entries.clear();
        self.heap.clear();
        count
    }

    // == Close ==
    /// Marks the store closed. Fails if it already was.
    pub(crate) fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.closed = true;
        Ok(())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    // == Sweep Expired ==
    /// Removes every entry due at `now`, walking from the heap root.
    ///
    /// The check-expiration hook may veto an expiry; the entry is then touched
    /// and kept. Returns the number of entries removed.
    pub(crate) fn sweep_expired(&mut self, now: Instant) -> usize {
        let mut expired = 0;
        while let Some(key) = self
            .heap
            .peek()
            .filter(|key| self.entries.get(key.as_str()).is_some_and(|e| e.is_expired(now)))
            .cloned()
        {
            let allowed = self
                .entries
                .get(&key)
                .is_some_and(|entry| self.callbacks.allow_expiry(&key, entry.value()));
            if allowed {
                self.evict(key, EvictionReason::Expired);
                expired += 1;
                continue;
            }

            trace!(key = %key, "expiry vetoed, renewing entry");
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.touch(now, self.global_ttl);
            }
            self.heap.update(&mut self.entries, &key);
        }
        expired
    }

    // == Evict All ==
    /// Evicts every entry, root first, with `reason`. Returns the number evicted.
    pub(crate) fn evict_all(&mut self, reason: EvictionReason) -> usize {
        let mut evicted = 0;
        while let Some(key) = self.heap.peek().cloned() {
            self.evict(key, reason);
            evicted += 1;
        }
        evicted
    }

    fn evict(&mut self, key: String, reason: EvictionReason) {
        self.heap.remove(&mut self.entries, &key);
        let Some(entry) = self.entries.remove(&key) else {
            return;
        };
        self.metrics.record_eviction(reason);
        trace!(key = %key, %reason, "entry evicted");
        self.callbacks.dispatch_eviction(key, entry.into_value(), reason);
    }

    // == Next Wakeup ==
    /// How long the scheduler should sleep from `now`.
    ///
    /// Until the root's expiration (at least [`MIN_SLEEP`]), or
    /// [`IDLE_INTERVAL`] when nothing expires; never longer than the global TTL.
    pub(crate) fn next_wakeup(&self, now: Instant) -> Duration {
        let sleep = match self.heap.next_expiration(&self.entries) {
            Some(deadline) => deadline.saturating_duration_since(now).max(MIN_SLEEP),
            None => IDLE_INTERVAL,
        };
        if self.global_ttl.is_zero() {
            sleep
        } else {
            sleep.min(self.global_ttl)
        }
    }

    /// Stored value of `key`, expired or not.
    pub(crate) fn value(&self, key: &str) -> Option<&V> {
        self.entries.get(key).map(Entry::value)
    }

    /// Remaining TTL of `key`, zero if absent or not expiring.
    pub(crate) fn remaining(&self, key: &str) -> Duration {
        self.entries
            .get(key)
            .map(|entry| entry.remaining(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    // == Configuration ==
    pub(crate) fn set_global_ttl(&mut self, ttl: Duration) -> Result<()> {
        self.ensure_open()?;
        debug!(?ttl, "global ttl changed");
        self.global_ttl = ttl;
        Ok(())
    }

    pub(crate) fn set_size_limit(&mut self, limit: usize) {
        debug!(limit, "size limit changed");
        self.size_limit = limit;
    }

    pub(crate) fn set_skip_ttl_extension(&mut self, skip: bool) {
        self.skip_ttl_extension = skip;
    }

    pub(crate) fn callbacks_mut(&mut self) -> &mut Callbacks<V> {
        &mut self.callbacks
    }

    pub(crate) fn new_item_callback(&self) -> Option<NewItemCallback<V>> {
        self.callbacks.new_item.clone()
    }

    pub(crate) fn set_loader(&mut self, loader: Loader<V>) {
        self.loader = Some(loader);
    }

    pub(crate) fn loader(&self) -> Option<&Loader<V>> {
        self.loader.as_ref()
    }

    pub(crate) fn in_flight_mut(&mut self) -> &mut InFlight<V> {
        &mut self.in_flight
    }

    // == Views ==
    /// Live keys; empty once closed.
    pub(crate) fn keys(&self) -> Vec<String> {
        if self.closed {
            return Vec::new();
        }
        self.entries.keys().cloned().collect()
    }

    /// Number of live entries; zero once closed.
    pub(crate) fn len(&self) -> usize {
        if self.closed {
            0
        } else {
            self.entries.len()
        }
    }

    pub(crate) fn metrics(&self) -> Metrics {
        self.metrics
    }

    #[cfg(test)]
    pub(crate) fn heap(&self) -> &ExpirationHeap<String> {
        &self.heap
    }

    #[cfg(test)]
    pub(crate) fn entries(&self) -> &HashMap<String, Entry<V>> {
        &self.entries
    }

    #[cfg(test)]
    pub(crate) fn expires_at(&self, key: &str) -> Option<Instant> {
        self.entries.get(key).and_then(crate::cache::HeapEntry::expires_at)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    fn store() -> CacheStore<String> {
        CacheStore::new(&CacheConfig::default(), Arc::new(Notify::new()))
    }

    fn store_with(config: CacheConfig) -> CacheStore<String> {
        CacheStore::new(&config, Arc::new(Notify::new()))
    }

    fn set(store: &mut CacheStore<String>, key: &str, ttl: Ttl) -> bool {
        store
            .set(key.to_string(), format!("{key}_value"), ttl)
            .unwrap()
    }

    #[test]
    fn test_store_new() {
        let store = store();
        assert_eq!(store.len(), 0);
        assert!(store.keys().is_empty());
        assert!(!store.is_closed());
    }

    #[test]
    fn test_store_set_and_get() {
        let mut store = store();

        assert!(set(&mut store, "key1", Ttl::Global));
        let (value, remaining) = store.get("key1").unwrap();

        assert_eq!(value, "key1_value");
        assert_eq!(remaining, Duration::ZERO, "non-expiring entries report zero");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_get_nonexistent() {
        let mut store = store();

        let result = store.get("nonexistent");
        assert!(matches!(result, Err(CacheError::NotFound(key)) if key == "nonexistent"));
    }

    #[test]
    fn test_store_overwrite_updates_in_place() {
        let mut store = store();

        assert!(set(&mut store, "key1", Ttl::After(SECOND)));
        let inserted = store
            .set("key1".to_string(), "value2".to_string(), Ttl::Never)
            .unwrap();
        assert!(!inserted);

        assert_eq!(store.get("key1").unwrap().0, "value2");
        assert_eq!(store.len(), 1);
        assert!(store.expires_at("key1").is_none());
        assert!(store.heap().is_consistent(store.entries()));
    }

    #[test]
    fn test_store_remove() {
        let mut store = store();

        set(&mut store, "key1", Ttl::Global);
        store.remove("key1").unwrap();

        assert_eq!(store.len(), 0);
        assert!(store.heap().is_empty());
        assert!(matches!(store.remove("key1"), Err(CacheError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_get_ignores_expired_entry() {
        let mut store = store();
        set(&mut store, "key1", Ttl::After(Duration::from_millis(50)));

        tokio::time::advance(Duration::from_millis(60)).await;

        assert!(matches!(store.get("key1"), Err(CacheError::NotFound(_))));
        assert!(matches!(store.touch("key1"), Err(CacheError::NotFound(_))));
        // Still present until swept
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_remove_ignores_expired_entry() {
        let mut store = store();
        set(&mut store, "key1", Ttl::After(Duration::from_millis(50)));

        tokio::time::advance(Duration::from_millis(60)).await;

        assert!(matches!(store.remove("key1"), Err(CacheError::NotFound(_))));
        assert_eq!(store.len(), 1);

        // The sweep still reports it as expired
        assert_eq!(store.sweep_expired(Instant::now()), 1);
        assert_eq!(store.metrics().evicted_expired, 1);
        assert!(store.heap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_touch_on_read() {
        let mut store = store();
        set(&mut store, "key1", Ttl::After(SECOND));

        tokio::time::advance(Duration::from_millis(400)).await;
        let before = store.remaining("key1");
        let (_, after) = store.get("key1").unwrap();

        assert!(after > before);
        assert_eq!(after, SECOND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_skip_ttl_extension() {
        let mut store = store_with(CacheConfig {
            skip_ttl_extension: true,
            ..CacheConfig::default()
        });
        set(&mut store, "key1", Ttl::After(SECOND));

        tokio::time::advance(Duration::from_millis(400)).await;
        let (_, remaining) = store.get("key1").unwrap();

        assert_eq!(remaining, Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_touch_resets_clock() {
        let mut store = store();
        set(&mut store, "key1", Ttl::After(SECOND));

        tokio::time::advance(Duration::from_millis(700)).await;
        store.touch("key1").unwrap();

        assert_eq!(store.remaining("key1"), SECOND);
        assert!(matches!(store.touch("missing"), Err(CacheError::NotFound(_))));
    }

    #[test]
    fn test_store_global_ttl_resolution() {
        let mut store = store();

        set(&mut store, "never", Ttl::Never);
        set(&mut store, "global", Ttl::Global);
        assert!(store.expires_at("global").is_none());

        store.set_global_ttl(SECOND).unwrap();
        store.touch("never").unwrap();
        store.touch("global").unwrap();

        assert!(store.expires_at("never").is_none());
        assert!(store.expires_at("global").is_some());
        assert_eq!(store.heap().peek().map(String::as_str), Some("global"));
    }

    #[test]
    fn test_store_size_limit_evicts_root() {
        let mut store = store_with(CacheConfig {
            size_limit: 3,
            ..CacheConfig::default()
        });

        set(&mut store, "key1", Ttl::After(SECOND * 30));
        set(&mut store, "key2", Ttl::After(SECOND * 10));
        set(&mut store, "key3", Ttl::After(SECOND * 20));

        // Cache is full, adding key4 evicts key2 (soonest to expire)
        set(&mut store, "key4", Ttl::After(SECOND * 40));

        assert_eq!(store.len(), 3);
        assert!(matches!(store.get("key2"), Err(CacheError::NotFound(_))));
        assert_eq!(store.metrics().evicted_full, 1);

        // Overwriting an existing key never evicts
        set(&mut store, "key1", Ttl::After(SECOND));
        assert_eq!(store.len(), 3);
        assert_eq!(store.metrics().evicted_full, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_sweep_expired() {
        let mut store = store();

        set(&mut store, "key1", Ttl::After(SECOND));
        set(&mut store, "key2", Ttl::After(SECOND * 10));
        set(&mut store, "key3", Ttl::Never);

        tokio::time::advance(Duration::from_millis(1100)).await;

        assert_eq!(store.sweep_expired(Instant::now()), 1);
        assert_eq!(store.len(), 2);
        assert!(store.get("key2").is_ok());
        assert_eq!(store.metrics().evicted_expired, 1);
        assert!(store.heap().is_consistent(store.entries()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_sweep_honours_veto() {
        let mut store = store();
        store.callbacks_mut().check_expire = Some(Arc::new(|key, _| key != "keep"));

        set(&mut store, "keep", Ttl::After(SECOND));
        set(&mut store, "drop", Ttl::After(SECOND));

        tokio::time::advance(SECOND).await;
        let now = Instant::now();

        assert_eq!(store.sweep_expired(now), 1);
        assert_eq!(store.keys(), vec!["keep".to_string()]);
        assert_eq!(store.expires_at("keep"), Some(now + SECOND));
    }

    #[test]
    fn test_store_evict_all() {
        let mut store = store();
        set(&mut store, "key1", Ttl::After(SECOND));
        set(&mut store, "key2", Ttl::Never);

        assert_eq!(store.evict_all(EvictionReason::Closed), 2);
        assert_eq!(store.len(), 0);
        assert!(store.heap().is_empty());
        assert_eq!(store.metrics().evicted_closed, 2);
    }

    #[test]
    fn test_store_purge_counts_closed() {
        let mut store = store();
        set(&mut store, "key1", Ttl::After(SECOND));
        set(&mut store, "key2", Ttl::Never);

        assert_eq!(store.purge(), 2);
        assert_eq!(store.len(), 0);
        assert!(store.heap().is_empty());
        assert_eq!(store.metrics().evicted_closed, 2);
    }

    #[test]
    fn test_store_close_is_terminal() {
        let mut store = store();
        set(&mut store, "key1", Ttl::Global);

        store.close().unwrap();

        assert!(matches!(store.close(), Err(CacheError::Closed)));
        assert!(matches!(
            store.set("k".to_string(), "v".to_string(), Ttl::Global),
            Err(CacheError::Closed)
        ));
        assert!(matches!(store.get("key1"), Err(CacheError::Closed)));
        assert!(matches!(store.remove("key1"), Err(CacheError::Closed)));
        assert!(matches!(store.touch("key1"), Err(CacheError::Closed)));
        assert!(matches!(store.set_global_ttl(SECOND), Err(CacheError::Closed)));
        assert_eq!(store.len(), 0);
        assert!(store.keys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_next_wakeup() {
        let mut store = store();
        let now = Instant::now();

        assert_eq!(store.next_wakeup(now), IDLE_INTERVAL);

        set(&mut store, "forever", Ttl::Never);
        assert_eq!(store.next_wakeup(now), IDLE_INTERVAL);

        set(&mut store, "soon", Ttl::After(SECOND * 5));
        assert_eq!(store.next_wakeup(now), SECOND * 5);

        store.set_global_ttl(SECOND * 2).unwrap();
        assert_eq!(store.next_wakeup(now), SECOND * 2);

        tokio::time::advance(SECOND * 6).await;
        assert_eq!(store.next_wakeup(Instant::now()), MIN_SLEEP);
    }

    #[test]
    fn test_store_metrics() {
        let mut store = store();

        set(&mut store, "key1", Ttl::Global);
        store.get("key1").unwrap();
        let _ = store.get("nonexistent");

        let metrics = store.metrics();
        assert_eq!(metrics.inserted, 1);
        assert_eq!(metrics.retrievals, 2);
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
    }
}
