//! Cache Module
//!
//! Provides an in-memory key-value cache with per-entry TTL expiration,
//! an optional size limit, eviction hooks and a deduplicated loader.

mod callbacks;
mod handle;
mod entry;
mod heap;
mod loader;
mod metrics;
mod reason;
pub(crate) mod store;


// Re-export public types
pub use handle::Cache;
pub use callbacks::{CheckExpireCallback, ExpireCallback, ExpireReasonCallback, NewItemCallback};
pub use entry::{Entry, Ttl};
pub use heap::{EntryLookup, ExpirationHeap, HeapEntry, HeapIndex};
pub use loader::{Loader, LoaderFuture};
pub use metrics::Metrics;
pub use reason::EvictionReason;
pub use store::{IDLE_INTERVAL, MIN_SLEEP};
