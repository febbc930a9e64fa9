//! In-memory query cache implementation for testing.
//!
//! Records every invalidation and cancellation so tests can assert on
//! exactly which keys were touched and how often.
//!
//! # Security Note
//!
//! This adapter is for **testing only** and should not be used in
//! production. It uses `.expect()` on lock operations which will panic if
//! locks are poisoned. Production deployments wire the portal's query-cache
//! client behind the `QueryCache` port.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::domain::CacheKey;
use crate::ports::{InvalidateOptions, QueryCache};

/// A single recorded invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    pub key: CacheKey,
    pub exact: bool,
}

/// Recording in-memory query cache.
///
/// # Panics
///
/// Methods may panic if internal locks are poisoned. This is acceptable
/// for test code but this adapter should NOT be used in production.
///
/// # Example
///
/// ```ignore
/// let cache = InMemoryQueryCache::new();
///
/// // ... run the sync core against it ...
///
/// assert_eq!(cache.invalidations_for(&CacheKey::new(["attendance"])), 1);
/// ```
#[derive(Clone)]
pub struct InMemoryQueryCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    invalidations: Mutex<Vec<Invalidation>>,
    cancellations: Mutex<Vec<CacheKey>>,
}

impl InMemoryQueryCache {
    /// Creates an empty recording cache.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CacheInner {
                invalidations: Mutex::new(Vec::new()),
                cancellations: Mutex::new(Vec::new()),
            }),
        }
    }

    // === Test Helpers ===

    /// Returns all recorded invalidations in arrival order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn invalidations(&self) -> Vec<Invalidation> {
        self.inner
            .invalidations
            .lock()
            .expect("InMemoryQueryCache: invalidations lock poisoned")
            .clone()
    }

    /// Returns the total number of invalidation calls.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn invalidation_count(&self) -> usize {
        self.inner
            .invalidations
            .lock()
            .expect("InMemoryQueryCache: invalidations lock poisoned")
            .len()
    }

    /// Returns how many times a specific key was invalidated.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn invalidations_for(&self, key: &CacheKey) -> usize {
        self.inner
            .invalidations
            .lock()
            .expect("InMemoryQueryCache: invalidations lock poisoned")
            .iter()
            .filter(|i| &i.key == key)
            .count()
    }

    /// Checks whether a key was ever invalidated.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn has_invalidated(&self, key: &CacheKey) -> bool {
        self.invalidations_for(key) > 0
    }

    /// Returns all keys with a cancelled pending refetch.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn cancelled_keys(&self) -> Vec<CacheKey> {
        self.inner
            .cancellations
            .lock()
            .expect("InMemoryQueryCache: cancellations lock poisoned")
            .clone()
    }

    /// Clears all recorded calls (for test isolation).
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn clear(&self) {
        self.inner
            .invalidations
            .lock()
            .expect("InMemoryQueryCache: invalidations lock poisoned")
            .clear();
        self.inner
            .cancellations
            .lock()
            .expect("InMemoryQueryCache: cancellations lock poisoned")
            .clear();
    }
}

impl Default for InMemoryQueryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryCache for InMemoryQueryCache {
    async fn invalidate(&self, key: &CacheKey, options: InvalidateOptions) {
        self.inner
            .invalidations
            .lock()
            .expect("InMemoryQueryCache: invalidations lock poisoned")
            .push(Invalidation {
                key: key.clone(),
                exact: options.exact,
            });
    }

    async fn cancel_pending(&self, key: &CacheKey) {
        self.inner
            .cancellations
            .lock()
            .expect("InMemoryQueryCache: cancellations lock poisoned")
            .push(key.clone());
    }
}
