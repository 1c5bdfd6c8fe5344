//! ttlcache - An async in-memory cache with per-entry expiration
//!
//! Entries expire individually through a min-heap ordered by expiration
//! time, swept by a background task that sleeps until the next deadline.

pub mod cache;
pub mod config;
pub mod error;
mod tasks;

pub use cache::{Cache, EvictionReason, Loader, Metrics, Ttl};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
