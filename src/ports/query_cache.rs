//! QueryCache port - Interface to the query-result cache.
//!
//! The cache stores query results under structured keys and owns the actual
//! refetch machinery. The sync core only marks keys stale; it never reads,
//! writes, or refetches cached data itself.

use async_trait::async_trait;

use crate::domain::CacheKey;

/// Options controlling the scope of an invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidateOptions {
    /// When false, the key and everything nested under it is invalidated.
    /// When true, only the exact key is touched.
    pub exact: bool,
}

impl InvalidateOptions {
    /// Invalidate the key and all keys nested under it.
    pub fn subtree() -> Self {
        Self { exact: false }
    }

    /// Invalidate only the exact key.
    pub fn exact() -> Self {
        Self { exact: true }
    }
}

/// Port for marking cached query results stale.
///
/// Implementations are expected to be cheap per call; the sync core bounds
/// the call rate for high-volume tables but still issues one call per
/// distinct key per throttle window.
#[async_trait]
pub trait QueryCache: Send + Sync {
    /// Marks a key stale so the next read refetches it.
    async fn invalidate(&self, key: &CacheKey, options: InvalidateOptions);

    /// Cancels any in-flight refetch for a key.
    ///
    /// Used on teardown so a dying component does not leave refetches
    /// racing against unmount.
    async fn cancel_pending(&self, key: &CacheKey);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn assert_cache_object_safe(_: &dyn QueryCache) {}

    #[test]
    fn subtree_and_exact_constructors() {
        assert!(!InvalidateOptions::subtree().exact);
        assert!(InvalidateOptions::exact().exact);
    }
}
