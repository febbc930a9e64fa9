//! Per-table coalescing of change events into bounded-rate invalidations.
//!
//! High-volume tables (live exam answers, attendance, chat) can emit bursts
//! that would saturate the cache layer with redundant refetches. The
//! throttled invalidator collects the affected keys per table and flushes
//! them in one pass when the table's window elapses.
//!
//! # Guarantees
//!
//! Within one window, arbitrarily many events coalesce into exactly one
//! invalidation per distinct key: no key is invalidated twice per window,
//! and no key that arrived within the window is dropped. The flush happens
//! no earlier than the first event's arrival plus the window.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::domain::CacheKey;
use crate::ports::{InvalidateOptions, QueryCache};

/// Coalesces change-event invalidations per table.
///
/// One timer task exists per table with pending keys; the bucket is created
/// on the first event after a quiescent period and destroyed when its timer
/// fires, which keeps cancellation trivial.
pub struct ThrottledInvalidator {
    cache: Arc<dyn QueryCache>,
    buckets: Mutex<HashMap<String, ThrottleBucket>>,
}

struct ThrottleBucket {
    pending: HashSet<CacheKey>,
    timer: JoinHandle<()>,
}

impl ThrottledInvalidator {
    /// Creates an invalidator writing to the given cache.
    pub fn new(cache: Arc<dyn QueryCache>) -> Arc<Self> {
        Arc::new(Self {
            cache,
            buckets: Mutex::new(HashMap::new()),
        })
    }

    fn buckets(&self) -> MutexGuard<'_, HashMap<String, ThrottleBucket>> {
        self.buckets
            .lock()
            .expect("ThrottledInvalidator: buckets lock poisoned")
    }

    /// Adds keys to the table's pending set, starting the window if idle.
    ///
    /// Repeated identical keys collapse; only the first event of a
    /// quiescent period starts a timer.
    pub fn notify(self: &Arc<Self>, table: &str, keys: &[CacheKey], window: Duration) {
        let mut buckets = self.buckets();
        match buckets.get_mut(table) {
            Some(bucket) => {
                bucket.pending.extend(keys.iter().cloned());
            }
            None => {
                let this = Arc::clone(self);
                let flush_table = table.to_string();
                // Anchor the window at the event's arrival, not at the
                // timer task's first poll.
                let sleep = tokio::time::sleep(window);
                let timer = tokio::spawn(async move {
                    sleep.await;
                    this.flush(&flush_table).await;
                });
                tracing::debug!(table, window_ms = window.as_millis() as u64, "throttle window opened");
                buckets.insert(
                    table.to_string(),
                    ThrottleBucket {
                        pending: keys.iter().cloned().collect(),
                        timer,
                    },
                );
            }
        }
    }

    /// Invalidates every distinct pending key for a table and drops the
    /// bucket.
    async fn flush(&self, table: &str) {
        let pending = self.buckets().remove(table).map(|bucket| bucket.pending);

        let Some(keys) = pending else {
            return;
        };

        tracing::debug!(table, keys = keys.len(), "flushing throttled invalidations");
        for key in keys {
            self.cache.invalidate(&key, InvalidateOptions::subtree()).await;
        }
    }

    /// Cancels the table's window and discards its pending keys.
    pub fn cancel(&self, table: &str) {
        if let Some(bucket) = self.buckets().remove(table) {
            bucket.timer.abort();
        }
    }

    /// Cancels every window; used on full teardown.
    pub fn shutdown(&self) {
        for (_, bucket) in self.buckets().drain() {
            bucket.timer.abort();
        }
    }

    /// True while the table has an open window with pending keys.
    pub fn has_pending(&self, table: &str) -> bool {
        self.buckets().contains_key(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::adapters::InMemoryQueryCache;

    const WINDOW: Duration = Duration::from_millis(1500);

    fn setup() -> (Arc<ThrottledInvalidator>, InMemoryQueryCache) {
        let cache = InMemoryQueryCache::new();
        let throttler = ThrottledInvalidator::new(Arc::new(cache.clone()));
        (throttler, cache)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_coalesces_into_one_pass_per_distinct_key() {
        let (throttler, cache) = setup();
        let a = CacheKey::new(["attendance"]);
        let b = CacheKey::new(["dashboard", "attendance-summary"]);

        // 5 events at t = 0, 200, 400, 600, 800ms, overlapping keys.
        throttler.notify("attendance", &[a.clone()], WINDOW);
        for _ in 0..4 {
            tokio::time::advance(Duration::from_millis(200)).await;
            throttler.notify("attendance", &[a.clone(), b.clone()], WINDOW);
        }

        // Window is anchored at the first event: nothing flushed yet.
        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(cache.invalidation_count(), 0);

        // One batch at ~1500ms covering the union of all events' keys.
        tokio::time::advance(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;
        assert_eq!(cache.invalidations_for(&a), 1);
        assert_eq!(cache.invalidations_for(&b), 1);
        assert_eq!(cache.invalidation_count(), 2);
        assert!(!throttler.has_pending("attendance"));
    }

    #[tokio::test(start_paused = true)]
    async fn flush_is_no_earlier_than_first_event_plus_window() {
        let (throttler, cache) = setup();
        let key = CacheKey::new(["messages"]);

        throttler.notify("messages", &[key.clone()], WINDOW);
        tokio::time::advance(WINDOW - Duration::from_millis(1)).await;
        assert_eq!(cache.invalidation_count(), 0);

        tokio::time::advance(Duration::from_millis(1)).await;
        tokio::task::yield_now().await;
        assert_eq!(cache.invalidations_for(&key), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn events_after_flush_open_a_fresh_window() {
        let (throttler, cache) = setup();
        let key = CacheKey::new(["notifications"]);

        throttler.notify("notifications", &[key.clone()], WINDOW);
        tokio::time::advance(WINDOW).await;
        tokio::task::yield_now().await;
        assert_eq!(cache.invalidations_for(&key), 1);

        throttler.notify("notifications", &[key.clone()], WINDOW);
        tokio::time::advance(WINDOW).await;
        tokio::task::yield_now().await;
        assert_eq!(cache.invalidations_for(&key), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn tables_throttle_independently() {
        let (throttler, cache) = setup();
        let attendance = CacheKey::new(["attendance"]);
        let answers = CacheKey::new(["exams", "answers"]);

        throttler.notify("attendance", &[attendance.clone()], Duration::from_millis(1500));
        throttler.notify("exam_answers", &[answers.clone()], Duration::from_millis(1000));

        tokio::time::advance(Duration::from_millis(1000)).await;
        tokio::task::yield_now().await;
        assert_eq!(cache.invalidations_for(&answers), 1);
        assert_eq!(cache.invalidations_for(&attendance), 0);

        tokio::time::advance(Duration::from_millis(500)).await;
        tokio::task::yield_now().await;
        assert_eq!(cache.invalidations_for(&attendance), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_discards_pending_keys() {
        let (throttler, cache) = setup();
        let key = CacheKey::new(["attendance"]);

        throttler.notify("attendance", &[key.clone()], WINDOW);
        throttler.cancel("attendance");

        tokio::time::advance(WINDOW * 2).await;
        tokio::task::yield_now().await;
        assert_eq!(cache.invalidation_count(), 0);
        assert!(!throttler.has_pending("attendance"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_leaves_no_dangling_windows() {
        let (throttler, cache) = setup();

        throttler.notify("attendance", &[CacheKey::new(["attendance"])], WINDOW);
        throttler.notify("messages", &[CacheKey::new(["messages"])], WINDOW);
        throttler.shutdown();

        tokio::time::advance(WINDOW * 2).await;
        tokio::task::yield_now().await;
        assert_eq!(cache.invalidation_count(), 0);
        assert!(!throttler.has_pending("attendance"));
        assert!(!throttler.has_pending("messages"));
    }
}
