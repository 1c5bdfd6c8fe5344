//! Eviction reasons reported to eviction callbacks.

use std::fmt;
use std::str::FromStr;

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EvictionReason {
    /// Explicitly removed through [`Cache::remove`](crate::Cache::remove).
    Removed,
    /// Evicted to make room under the size limit.
    EvictedSize,
    /// The entry's TTL elapsed.
    Expired,
    /// The cache was closed.
    Closed,
}

impl EvictionReason {
    pub const ALL: [EvictionReason; 4] = [
        EvictionReason::Removed,
        EvictionReason::EvictedSize,
        EvictionReason::Expired,
        EvictionReason::Closed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EvictionReason::Removed => "Removed",
            EvictionReason::EvictedSize => "EvictedSize",
            EvictionReason::Expired => "Expired",
            EvictionReason::Closed => "Closed",
        }
    }
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|reason| reason.as_str() == s)
            .ok_or_else(|| format!("{s} does not belong to EvictionReason values"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for reason in EvictionReason::ALL {
            assert_eq!(reason.to_string().parse::<EvictionReason>(), Ok(reason));
        }
        assert!("Evicted".parse::<EvictionReason>().is_err());
    }
}
