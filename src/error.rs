//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use std::sync::Arc;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for cache operations.
///
/// The type is `Clone` so that a single loader outcome can be handed to every
/// caller waiting on the same key.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The cache has been closed
    #[error("cache already closed")]
    Closed,

    /// Key not present (or already expired) and no loader was usable
    #[error("key not found: {0}")]
    NotFound(String),

    /// Error returned by a loader function, passed through unchanged
    #[error("{0}")]
    Loader(Arc<anyhow::Error>),
}

impl CacheError {
    /// Returns the loader error if this is a loader failure.
    pub fn loader_error(&self) -> Option<&anyhow::Error> {
        match self {
            CacheError::Loader(err) => Some(&**err),
            _ => None,
        }
    }

    /// Returns true if this error is [`CacheError::Closed`].
    pub fn is_closed(&self) -> bool {
        matches!(self, CacheError::Closed)
    }

    /// Returns true if this error is [`CacheError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }
}

impl From<anyhow::Error> for CacheError {
    fn from(err: anyhow::Error) -> Self {
        CacheError::Loader(Arc::new(err))
    }
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
