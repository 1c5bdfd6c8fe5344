//! Callback Hooks Module
//!
//! Optional user hooks fired on eviction, on insertion of a new key, and the
//! veto hook consulted before an entry expires.
//!
//! Eviction hooks run fire-and-forget: every invocation gets its own Tokio
//! task. Their completion is not synchronized with the operation that evicted
//! the entry, nor with [`Cache::close`](crate::Cache::close).

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

use crate::cache::EvictionReason;

/// Called with the key and value of an evicted entry.
pub type ExpireCallback<V> = Arc<dyn Fn(&str, &V) + Send + Sync>;

/// Called with the key, eviction reason and value of an evicted entry.
pub type ExpireReasonCallback<V> = Arc<dyn Fn(&str, EvictionReason, &V) + Send + Sync>;

/// Asked before an entry expires. Returning `false` keeps the entry for another TTL cycle.
pub type CheckExpireCallback<V> = Arc<dyn Fn(&str, &V) -> bool + Send + Sync>;

/// Called after a key that was absent has been inserted.
pub type NewItemCallback<V> = Arc<dyn Fn(&str, &V) + Send + Sync>;

// == Callbacks ==
pub(crate) struct Callbacks<V> {
    pub(crate) expire: Option<ExpireCallback<V>>,
    pub(crate) expire_reason: Option<ExpireReasonCallback<V>>,
    pub(crate) check_expire: Option<CheckExpireCallback<V>>,
    pub(crate) new_item: Option<NewItemCallback<V>>,
}

impl<V> Default for Callbacks<V> {
    fn default() -> Self {
        Self {
            expire: None,
            expire_reason: None,
            check_expire: None,
            new_item: None,
        }
    }
}

impl<V> fmt::Debug for Callbacks<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("expire", &self.expire.is_some())
            .field("expire_reason", &self.expire_reason.is_some())
            .field("check_expire", &self.check_expire.is_some())
            .field("new_item", &self.new_item.is_some())
            .finish()
    }
}

impl<V> Callbacks<V>
where
    V: Clone + Send + Sync + 'static,
{
    // == Dispatch Eviction ==
    /// Spawns one task per registered eviction hook.
    ///
    /// A panicking hook only takes down its own task.
    pub(crate) fn dispatch_eviction(&self, key: String, value: V, reason: EvictionReason) {
        if let Some(callback) = &self.expire {
            let callback = Arc::clone(callback);
            let key = key.clone();
            let value = value.clone();
            tokio::spawn(async move { callback(&key, &value) });
        }
        if let Some(callback) = &self.expire_reason {
            let callback = Arc::clone(callback);
            tokio::spawn(async move { callback(&key, reason, &value) });
        }
    }

    // == Allow Expiry ==
    /// Consults the veto hook. Without a hook, or if it panics, the entry may expire.
    pub(crate) fn allow_expiry(&self, key: &str, value: &V) -> bool {
        let Some(callback) = &self.check_expire else {
            return true;
        };
        match panic::catch_unwind(AssertUnwindSafe(|| callback(key, value))) {
            Ok(allow) => allow,
            Err(_) => {
                warn!(key, "check-expiration callback panicked, expiring entry");
                true
            }
        }
    }
}
