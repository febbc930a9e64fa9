//! Interval-based fallback refresh.
//!
//! While push delivery is unhealthy, each affected table gets one recurring
//! timer that marks its cache keys stale. Data may then be up to one
//! interval stale, but it is never unavailable: polling is always a viable
//! substitute for push.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::domain::CacheKey;
use crate::ports::{InvalidateOptions, QueryCache};

/// Owns the fallback polling timers, one per table.
pub struct PollingScheduler {
    cache: Arc<dyn QueryCache>,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl PollingScheduler {
    /// Creates a scheduler writing to the given cache.
    pub fn new(cache: Arc<dyn QueryCache>) -> Arc<Self> {
        Arc::new(Self {
            cache,
            timers: Mutex::new(HashMap::new()),
        })
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.timers
            .lock()
            .expect("PollingScheduler: timers lock poisoned")
    }

    /// Starts the recurring timer for a table.
    ///
    /// A second start for a table already being polled is a no-op, so a
    /// table never double-polls. The first tick happens one full interval
    /// after start.
    pub fn start(&self, table: &str, keys: Vec<CacheKey>, interval: Duration) {
        let mut timers = self.timers();
        if timers.contains_key(table) {
            return;
        }

        tracing::info!(table, interval_secs = interval.as_secs(), "starting fallback polling");
        let cache = Arc::clone(&self.cache);
        // Anchor the first tick at start time, not at the timer task's
        // first poll.
        let first_tick = tokio::time::Instant::now() + interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first_tick, interval);
            loop {
                ticker.tick().await;
                for key in &keys {
                    cache.invalidate(key, InvalidateOptions::subtree()).await;
                }
            }
        });
        timers.insert(table.to_string(), handle);
    }

    /// Cancels the table's timer; safe to call when none exists.
    pub fn stop(&self, table: &str) {
        if let Some(handle) = self.timers().remove(table) {
            tracing::info!(table, "stopping fallback polling");
            handle.abort();
        }
    }

    /// Cancels every timer; must leave no dangling timers behind.
    pub fn stop_all(&self) {
        let mut timers = self.timers();
        if !timers.is_empty() {
            tracing::info!(tables = timers.len(), "stopping all fallback polling");
        }
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }

    /// True while the table has an active timer.
    pub fn is_polling(&self, table: &str) -> bool {
        self.timers().contains_key(table)
    }

    /// Number of tables currently being polled.
    pub fn active_count(&self) -> usize {
        self.timers().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::adapters::InMemoryQueryCache;

    const INTERVAL: Duration = Duration::from_secs(30);

    fn setup() -> (Arc<PollingScheduler>, InMemoryQueryCache) {
        let cache = InMemoryQueryCache::new();
        let scheduler = PollingScheduler::new(Arc::new(cache.clone()));
        (scheduler, cache)
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_invalidate_every_configured_key() {
        let (scheduler, cache) = setup();
        let a = CacheKey::new(["grades"]);
        let b = CacheKey::new(["report-cards"]);

        scheduler.start("grades", vec![a.clone(), b.clone()], INTERVAL);

        tokio::time::advance(INTERVAL).await;
        tokio::task::yield_now().await;
        assert_eq!(cache.invalidations_for(&a), 1);
        assert_eq!(cache.invalidations_for(&b), 1);

        tokio::time::advance(INTERVAL).await;
        tokio::task::yield_now().await;
        assert_eq!(cache.invalidations_for(&a), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_a_full_interval() {
        let (scheduler, cache) = setup();
        scheduler.start("exams", vec![CacheKey::new(["exams", "list"])], INTERVAL);

        tokio::time::advance(INTERVAL - Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        assert_eq!(cache.invalidation_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn double_start_is_a_no_op() {
        let (scheduler, cache) = setup();
        let key = CacheKey::new(["students"]);

        scheduler.start("students", vec![key.clone()], INTERVAL);
        scheduler.start("students", vec![key.clone()], INTERVAL);
        assert_eq!(scheduler.active_count(), 1);

        tokio::time::advance(INTERVAL).await;
        tokio::task::yield_now().await;
        assert_eq!(cache.invalidations_for(&key), 1, "no double polling");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_future_ticks() {
        let (scheduler, cache) = setup();
        let key = CacheKey::new(["messages"]);

        scheduler.start("messages", vec![key.clone()], INTERVAL);
        scheduler.stop("messages");
        assert!(!scheduler.is_polling("messages"));

        tokio::time::advance(INTERVAL * 3).await;
        tokio::task::yield_now().await;
        assert_eq!(cache.invalidation_count(), 0);
    }

    #[tokio::test]
    async fn stop_without_timer_is_safe() {
        let (scheduler, _cache) = setup();
        scheduler.stop("never-started");
        assert_eq!(scheduler.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_leaves_no_dangling_timers() {
        let (scheduler, cache) = setup();
        scheduler.start("grades", vec![CacheKey::new(["grades"])], INTERVAL);
        scheduler.start("exams", vec![CacheKey::new(["exams", "list"])], INTERVAL);
        assert_eq!(scheduler.active_count(), 2);

        scheduler.stop_all();
        assert_eq!(scheduler.active_count(), 0);

        tokio::time::advance(INTERVAL * 2).await;
        tokio::task::yield_now().await;
        assert_eq!(cache.invalidation_count(), 0);
    }
}
