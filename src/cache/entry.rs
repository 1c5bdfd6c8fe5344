//! Cache Entry Module
//!
//! Defines individual cache entries, their TTL semantics and expiration clock.

use std::time::Duration;

use tokio::time::Instant;

use crate::cache::heap::{HeapEntry, HeapIndex};

// == TTL ==
/// Time-to-live of a single entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ttl {
    /// The entry never expires, even if a global TTL is set later.
    Never,
    /// The entry follows the cache's global TTL at the moment it is touched.
    #[default]
    Global,
    /// Explicit per-entry TTL. A zero duration behaves like [`Ttl::Global`].
    After(Duration),
}

impl Ttl {
    // == Resolve ==
    /// Returns the effective TTL against the given global TTL, or `None` if
    /// the entry does not expire.
    ///
    /// A zero `global_ttl` means the cache has no global TTL.
    pub fn resolve(self, global_ttl: Duration) -> Option<Duration> {
        match self {
            Ttl::Never => None,
            Ttl::After(ttl) if !ttl.is_zero() => Some(ttl),
            _ if global_ttl.is_zero() => None,
            _ => Some(global_ttl),
        }
    }
}

impl From<Duration> for Ttl {
    /// A zero duration inherits the global TTL.
    fn from(ttl: Duration) -> Self {
        if ttl.is_zero() {
            Ttl::Global
        } else {
            Ttl::After(ttl)
        }
    }
}

// == Cache Entry ==
/// A single cached key/value pair plus its expiration metadata.
#[derive(Debug)]
pub struct Entry<V> {
    key: String,
    value: V,
    ttl: Ttl,
    /// Absolute expiration, `None` = does not expire
    expires_at: Option<Instant>,
    heap_index: HeapIndex,
}

impl<V> Entry<V> {
    // == Constructor ==
    /// Creates an entry that is not yet indexed and has no expiration.
    ///
    /// Call [`Entry::touch`] to start its expiration clock.
    pub fn new(key: String, value: V, ttl: Ttl) -> Self {
        Self {
            key,
            value,
            ttl,
            expires_at: None,
            heap_index: HeapIndex::default(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn ttl(&self) -> Ttl {
        self.ttl
    }

    /// Replaces value and TTL in place. The expiration is not refreshed.
    pub fn replace(&mut self, value: V, ttl: Ttl) {
        self.value = value;
        self.ttl = ttl;
    }

    // == Touch ==
    /// Restarts the expiration clock: `now + effective ttl`.
    ///
    /// An entry whose TTL resolves to nothing, or whose deadline is past the
    /// representable range, stops expiring.
    pub fn touch(&mut self, now: Instant, global_ttl: Duration) {
        self.expires_at = self
            .ttl
            .resolve(global_ttl)
            .and_then(|ttl| now.checked_add(ttl));
    }

    // == Is Expired ==
    /// Checks if the entry is due at `now`.
    ///
    /// An entry is due once `now` reaches its expiration instant.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }

    // == Time To Live ==
    /// Returns the remaining TTL, floored at zero. Non-expiring entries report zero.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at
            .map(|expires| expires.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    pub fn into_value(self) -> V {
        self.value
    }
}

impl<V> HeapEntry for Entry<V> {
    fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    fn heap_index(&self) -> &HeapIndex {
        &self.heap_index
    }

    fn heap_index_mut(&mut self) -> &mut HeapIndex {
        &mut self.heap_index
    }
}
