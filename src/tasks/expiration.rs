//! Expiration Scheduler Task
//!
//! Background task that sleeps until the next entry is due and then sweeps
//! every due entry. It wakes early when the heap root or the configuration
//! changes, and drains the cache when shutdown is requested.

use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::cache::store::CacheStore;
use crate::cache::EvictionReason;

/// Sent by `close`; the scheduler answers once the cache is drained.
pub(crate) type ShutdownRequest = oneshot::Sender<()>;

/// Spawns the expiration scheduler for one cache.
///
/// The task holds only a weak reference to the store. It stops when a
/// shutdown request arrives (after evicting every remaining entry with
/// [`EvictionReason::Closed`] and acknowledging) or when every sender of
/// `shutdown` is gone.
///
/// # Arguments
/// * `store` - The cache state, shared with the cache handle
/// * `wakeup` - Fired on root or configuration changes
/// * `shutdown` - Receives shutdown requests from `close`
pub(crate) fn spawn_expiration_task<V>(
    store: Weak<Mutex<CacheStore<V>>>,
    wakeup: Arc<Notify>,
    mut shutdown: mpsc::Receiver<ShutdownRequest>,
) -> JoinHandle<()>
where
    V: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        info!("expiration scheduler started");

        loop {
            // Register for wakeups before reading the deadline so a change
            // made after the read still interrupts the sleep.
            let notified = wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let Some(sleep_for) = with_store(&store, |s| s.next_wakeup(Instant::now())).await
            else {
                break;
            };
            trace!(?sleep_for, "scheduler sleeping");

            tokio::select! {
                biased;

                request = shutdown.recv() => {
                    if let Some(ack) = request {
                        let drained = with_store(&store, |s| s.evict_all(EvictionReason::Closed))
                            .await
                            .unwrap_or(0);
                        debug!(drained, "evicted remaining entries on shutdown");
                        let _ = ack.send(());
                    }
                    break;
                }
                _ = tokio::time::sleep(sleep_for) => {
                    match with_store(&store, |s| s.sweep_expired(Instant::now())).await {
                        Some(0) => {}
                        Some(expired) => debug!(expired, "expired entries swept"),
                        None => break,
                    }
                }
                _ = &mut notified => {
                    trace!("scheduler woken early, recomputing deadline");
                }
            }
        }

        info!("expiration scheduler stopped");
    })
}

/// Runs `f` under the cache lock, or returns `None` if the cache is gone.
async fn with_store<V, R>(
    store: &Weak<Mutex<CacheStore<V>>>,
    f: impl FnOnce(&mut CacheStore<V>) -> R,
) -> Option<R> {
    let store = store.upgrade()?;
    let mut guard = store.lock().await;
    Some(f(&mut *guard))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Ttl;
    use crate::config::CacheConfig;
    use std::time::Duration;

    struct Harness {
        store: Arc<Mutex<CacheStore<String>>>,
        shutdown: mpsc::Sender<ShutdownRequest>,
        handle: JoinHandle<()>,
    }

    fn start(config: CacheConfig) -> Harness {
        let wakeup = Arc::new(Notify::new());
        let store = Arc::new(Mutex::new(CacheStore::new(&config, wakeup.clone())));
        let (shutdown, requests) = mpsc::channel(1);
        let handle = spawn_expiration_task(Arc::downgrade(&store), wakeup, requests);
        Harness {
            store,
            shutdown,
            handle,
        }
    }

    async fn set(harness: &Harness, key: &str, ttl: Ttl) {
        harness
            .store
            .lock()
            .await
            .set(key.to_string(), "value".to_string(), ttl)
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_removes_expired_entries() {
        let harness = start(CacheConfig::default());
        set(&harness, "expire_soon", Ttl::After(Duration::from_millis(50))).await;
        set(&harness, "long_lived", Ttl::After(Duration::from_secs(3600))).await;

        tokio::time::sleep(Duration::from_millis(60)).await;

        let store = harness.store.lock().await;
        assert_eq!(store.keys(), vec!["long_lived".to_string()]);
        assert_eq!(store.metrics().evicted_expired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_wakes_for_earlier_entry() {
        let harness = start(CacheConfig::default());
        set(&harness, "late", Ttl::After(Duration::from_secs(3600))).await;

        // Let the scheduler settle into its long sleep
        tokio::time::sleep(Duration::from_millis(1)).await;

        set(&harness, "soon", Ttl::After(Duration::from_millis(50))).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(harness.store.lock().await.keys(), vec!["late".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_rechecks_within_global_ttl() {
        let harness = start(CacheConfig {
            global_ttl: Duration::from_millis(100),
            ..CacheConfig::default()
        });
        set(&harness, "global", Ttl::Global).await;
        set(&harness, "never", Ttl::Never).await;

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(harness.store.lock().await.keys(), vec!["never".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_drains_on_shutdown() {
        let harness = start(CacheConfig::default());
        set(&harness, "a", Ttl::Never).await;
        set(&harness, "b", Ttl::After(Duration::from_secs(60))).await;

        let (ack, done) = oneshot::channel();
        harness.shutdown.send(ack).await.unwrap();
        done.await.unwrap();

        let store = harness.store.lock().await;
        assert_eq!(store.len(), 0);
        assert_eq!(store.metrics().evicted_closed, 2);
        drop(store);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(harness.handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_stops_when_cache_dropped() {
        let Harness {
            store,
            shutdown,
            handle,
        } = start(CacheConfig::default());

        tokio::time::sleep(Duration::from_millis(1)).await;
        drop(shutdown);
        drop(store);
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(handle.is_finished(), "Task should be finished once the cache is gone");
    }
}
