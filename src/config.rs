//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::time::Duration;

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Global TTL for entries stored with `Ttl::Global` (zero = no global TTL)
    pub global_ttl: Duration,
    /// Maximum number of live entries (0 = unbounded)
    pub size_limit: usize,
    /// When true, reads do not extend an entry's expiration
    pub skip_ttl_extension: bool,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_GLOBAL_TTL_MS` - Global TTL in milliseconds (default: 0, none)
    /// - `CACHE_SIZE_LIMIT` - Maximum live entries (default: 0, unbounded)
    /// - `CACHE_SKIP_TTL_EXTENSION` - `true` to disable touch-on-read (default: false)
    pub fn from_env() -> Self {
        Self {
            global_ttl: env::var("CACHE_GLOBAL_TTL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(Duration::ZERO),
            size_limit: env::var("CACHE_SIZE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            skip_ttl_extension: env::var("CACHE_SKIP_TTL_EXTENSION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            global_ttl: Duration::ZERO,
            size_limit: 0,
            skip_ttl_extension: false,
        }
    }
}
